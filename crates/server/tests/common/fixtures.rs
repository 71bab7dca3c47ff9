//! Test fixtures for generating test data.

use bytes::Bytes;

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// A tiny MP3-typed payload. Content is never decoded.
#[allow(dead_code)]
pub fn test_audio(len: usize) -> Bytes {
    seeded_bytes(len as u64, len)
}

/// Strip the advertised base URL from an absolute URL to get a router path.
#[allow(dead_code)]
pub fn router_path(url: &str) -> &str {
    url.strip_prefix(super::TEST_BASE_URL)
        .unwrap_or_else(|| panic!("url {url} is not on the test server"))
}

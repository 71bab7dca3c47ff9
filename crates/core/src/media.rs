//! Media kinds and object key layout.
//!
//! Uploads land in the pending namespace under
//! `pending/{kind}/{fish_id}/{uuid}.{ext}` and are moved on confirm to
//! `{kind}/{fish_id}/{uuid}.{ext}`. The permanent key is derived from the
//! pending key alone, so a retried confirm always targets the same object.

use crate::catalog::FishId;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of the pending namespace.
pub const PENDING_PREFIX: &str = "pending/";

/// Default upload limit for audio files: 20 MiB.
pub const DEFAULT_MAX_AUDIO_BYTES: u64 = 20 * 1024 * 1024;

/// Default upload limit for images: 10 MiB.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

const AUDIO_TYPES: &[(&str, &str)] = &[
    ("audio/mpeg", "mp3"),
    ("audio/mp4", "m4a"),
    ("audio/wav", "wav"),
    ("audio/x-wav", "wav"),
    ("audio/ogg", "ogg"),
    ("audio/webm", "webm"),
];

const IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
];

/// Kind of media attached to a fish record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Pronunciation recordings.
    Audio,
    /// Photographs and drawings.
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Image => "image",
        }
    }

    fn types(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Audio => AUDIO_TYPES,
            Self::Image => IMAGE_TYPES,
        }
    }

    /// Content types accepted for this kind.
    pub fn allowed_content_types(&self) -> impl Iterator<Item = &'static str> {
        self.types().iter().map(|(ct, _)| *ct)
    }

    /// File extension used for keys of the given content type, if allowed.
    pub fn extension_for(&self, content_type: &str) -> Option<&'static str> {
        let essence = content_type_essence(content_type);
        self.types()
            .iter()
            .find(|(ct, _)| ct.eq_ignore_ascii_case(&essence))
            .map(|(_, ext)| *ext)
    }

    fn accepts_extension(&self, ext: &str) -> Option<&'static str> {
        self.types()
            .iter()
            .find(|(_, e)| *e == ext)
            .map(|(_, e)| *e)
    }

    /// Content type to serve for a stored extension.
    pub fn content_type_for_extension(&self, ext: &str) -> Option<&'static str> {
        self.types()
            .iter()
            .find(|(_, e)| *e == ext)
            .map(|(ct, _)| *ct)
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "audio" => Ok(Self::Audio),
            "image" => Ok(Self::Image),
            _ => Err(Error::InvalidMediaKey(format!("unknown media kind: {s}"))),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip parameters and whitespace from a content type (`audio/ogg; codecs=opus`).
pub fn content_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// The identity of one uploaded media object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaKey {
    pub kind: MediaKind,
    pub fish_id: FishId,
    pub file_id: Uuid,
    pub extension: &'static str,
}

impl MediaKey {
    /// Allocate a fresh key for an upload of `content_type`.
    pub fn generate(kind: MediaKind, fish_id: FishId, content_type: &str) -> Result<Self> {
        let extension = kind
            .extension_for(content_type)
            .ok_or_else(|| Error::UnsupportedMediaType(content_type.to_string()))?;
        Ok(Self {
            kind,
            fish_id,
            file_id: Uuid::new_v4(),
            extension,
        })
    }

    /// Key in the pending namespace.
    pub fn pending_key(&self) -> String {
        format!("{PENDING_PREFIX}{}", self.permanent_key())
    }

    /// Key in the permanent namespace.
    pub fn permanent_key(&self) -> String {
        format!(
            "{}/{}/{}.{}",
            self.kind,
            self.fish_id,
            self.file_id.hyphenated(),
            self.extension
        )
    }

    /// Content type matching the key's extension.
    pub fn content_type(&self) -> &'static str {
        self.kind
            .content_type_for_extension(self.extension)
            .unwrap_or("application/octet-stream")
    }

    /// Parse a pending key.
    pub fn parse_pending(key: &str) -> Result<Self> {
        let rest = key
            .strip_prefix(PENDING_PREFIX)
            .ok_or_else(|| Error::InvalidMediaKey(format!("not a pending key: {key}")))?;
        Self::parse_permanent(rest)
            .map_err(|_| Error::InvalidMediaKey(format!("malformed pending key: {key}")))
    }

    /// Parse a permanent key.
    pub fn parse_permanent(key: &str) -> Result<Self> {
        let invalid = || Error::InvalidMediaKey(format!("malformed media key: {key}"));

        let mut segments = key.split('/');
        let (Some(kind), Some(fish), Some(file), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(invalid());
        };

        let kind: MediaKind = kind.parse().map_err(|_| invalid())?;
        if !fish.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let fish_id: FishId = fish.parse().map_err(|_| invalid())?;

        let (stem, ext) = file.split_once('.').ok_or_else(invalid)?;
        let file_id = Uuid::parse_str(stem).map_err(|_| invalid())?;
        // Only the canonical lowercase hyphenated form, so one object has one key.
        if file_id.hyphenated().to_string() != stem {
            return Err(invalid());
        }
        let extension = kind.accepts_extension(ext).ok_or_else(invalid)?;

        Ok(Self {
            kind,
            fish_id,
            file_id,
            extension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fish(id: i64) -> FishId {
        FishId::new(id).unwrap()
    }

    #[test]
    fn test_generate_and_parse() {
        let key = MediaKey::generate(MediaKind::Audio, fish(7), "audio/mpeg").unwrap();
        let pending = key.pending_key();
        assert!(pending.starts_with("pending/audio/7/"));
        assert!(pending.ends_with(".mp3"));

        let parsed = MediaKey::parse_pending(&pending).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.permanent_key(), pending.trim_start_matches(PENDING_PREFIX));
    }

    #[test]
    fn test_content_type_params_ignored() {
        assert_eq!(
            MediaKind::Audio.extension_for("Audio/Ogg; codecs=opus"),
            Some("ogg")
        );
        assert_eq!(MediaKind::Audio.extension_for("image/png"), None);
        assert_eq!(MediaKind::Image.extension_for("image/jpeg"), Some("jpg"));
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = MediaKey::generate(MediaKind::Image, fish(1), "image/gif").unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType(_)));
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        let id = Uuid::new_v4();
        let bad = [
            format!("audio/7/{id}.mp3"),
            format!("pending/audio/7/{id}"),
            format!("pending/audio/7/{id}.png"),
            format!("pending/video/7/{id}.mp4"),
            format!("pending/audio/0/{id}.mp3"),
            format!("pending/audio/+7/{id}.mp3"),
            format!("pending/audio/7/../{id}.mp3"),
            format!("pending/audio/7/{}.mp3", id.simple()),
            format!("pending/audio/7/{}.mp3", id.hyphenated().to_string().to_uppercase()),
            "pending/audio/7/../../etc/passwd".to_string(),
            "".to_string(),
        ];
        for key in bad {
            assert!(MediaKey::parse_pending(&key).is_err(), "accepted {key:?}");
        }
    }

    #[test]
    fn test_permanent_key_roundtrip() {
        let key = MediaKey::generate(MediaKind::Image, fish(3), "image/webp").unwrap();
        let parsed = MediaKey::parse_permanent(&key.permanent_key()).unwrap();
        assert_eq!(parsed.content_type(), "image/webp");
        assert!(MediaKey::parse_permanent(&key.pending_key()).is_err());
    }
}

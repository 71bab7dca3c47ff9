//! Per-client-IP rate limiting.
//!
//! Each client IP gets a token bucket from `governor`. The set of tracked IPs
//! is bounded by `max_entries`; a background task evicts entries idle for
//! longer than `entry_ttl_secs`.
//!
//! Forwarded headers (`X-Forwarded-For`, `X-Real-IP`) are only honored when
//! the direct peer is listed in `trusted_proxies`. With the default empty
//! list the connection address is always used.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::{DashMap, mapref::entry::Entry};
use fishlore_core::config::RateLimitConfig;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState,
};
use ipnet::IpNet;
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

type IpLimiter = RateLimiter<String, DashMap<String, InMemoryState>, DefaultClock, NoOpMiddleware>;

/// Evicting at least this fraction of entries triggers a limiter rebuild.
const REBUILD_EVICTION_FRACTION: f64 = 0.10;

/// Evicting at least this many entries triggers a limiter rebuild.
const REBUILD_EVICTION_MIN_COUNT: usize = 100;

/// Rebuild anyway once this long has passed since the last one.
const REBUILD_MIN_INTERVAL: Duration = Duration::from_secs(300);

/// Retry hint sent when the tracker is full.
const AT_CAPACITY_RETRY_SECS: u64 = 60;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Option<Arc<Inner>>,
}

struct Inner {
    /// Governor keeps one bucket per key and cannot forget keys, so it is
    /// swapped for a fresh one after large evictions.
    limiter: RwLock<IpLimiter>,
    quota: Quota,
    last_seen: DashMap<String, Instant>,
    last_rebuild: RwLock<Instant>,
    trusted_proxies: TrustedProxies,
    max_entries: usize,
    entry_ttl: Duration,
    connect_info_warned: AtomicBool,
    at_capacity_warned: AtomicBool,
}

impl Inner {
    fn limiter(&self) -> std::sync::RwLockReadGuard<'_, IpLimiter> {
        self.limiter.read().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn rebuild(&self, now: Instant) {
        let mut limiter = self.limiter.write().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter lock poisoned during rebuild, recovering");
            poisoned.into_inner()
        });
        *limiter = RateLimiter::dashmap(self.quota);

        let mut last = self
            .last_rebuild
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = now;
    }

    fn should_rebuild(&self, evicted: usize, entries_before: usize, now: Instant) -> bool {
        let threshold = ((entries_before as f64 * REBUILD_EVICTION_FRACTION) as usize)
            .max(REBUILD_EVICTION_MIN_COUNT);
        if evicted >= threshold {
            return true;
        }
        let last = self
            .last_rebuild
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        now.duration_since(*last) >= REBUILD_MIN_INTERVAL
    }
}

#[derive(Clone, Debug)]
enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

impl TrustedEntry {
    fn parse(raw: &str) -> Option<Self> {
        let parsed = if raw.contains('/') {
            raw.parse::<IpNet>().map(Self::Cidr).map_err(|e| e.to_string())
        } else {
            raw.parse::<IpAddr>().map(Self::Ip).map_err(|e| e.to_string())
        };
        match parsed {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(entry = %raw, error = %e, "ignoring invalid trusted_proxies entry");
                None
            }
        }
    }

    fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            Self::Ip(trusted) => trusted == ip,
            Self::Cidr(network) => network.contains(ip),
        }
    }
}

/// Which peers may set forwarded headers.
#[derive(Clone, Debug)]
enum TrustedProxies {
    None,
    All,
    List(Vec<TrustedEntry>),
}

impl TrustedProxies {
    fn from_config(proxies: &[String]) -> Self {
        match proxies {
            [] => Self::None,
            [only] if only == "*" => Self::All,
            list => Self::List(list.iter().filter_map(|p| TrustedEntry::parse(p)).collect()),
        }
    }

    fn is_trusted(&self, peer: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::List(entries) => peer
                .parse::<IpAddr>()
                .map(|ip| entries.iter().any(|entry| entry.contains(&ip)))
                .unwrap_or(false),
        }
    }
}

impl RateLimitState {
    /// Create rate limit state from configuration. Disabled config yields a no-op limiter.
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }

        let per_minute = NonZeroU32::new(config.ip_requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);

        Self {
            inner: Some(Arc::new(Inner {
                limiter: RwLock::new(RateLimiter::dashmap(quota)),
                quota,
                last_seen: DashMap::new(),
                last_rebuild: RwLock::new(Instant::now()),
                trusted_proxies: TrustedProxies::from_config(&config.trusted_proxies),
                max_entries: config.max_entries as usize,
                entry_ttl: Duration::from_secs(config.entry_ttl_secs),
                connect_info_warned: AtomicBool::new(false),
                at_capacity_warned: AtomicBool::new(false),
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Check whether a request from `ip` is allowed.
    pub fn check_ip(&self, ip: &str) -> Result<(), RateLimitError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        // len() must not be called while an entry guard is held.
        let tracked = inner.last_seen.len();
        match inner.last_seen.entry(ip.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(Instant::now());
            }
            Entry::Vacant(entry) => {
                if tracked >= inner.max_entries {
                    if !inner.at_capacity_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            tracked,
                            max_entries = inner.max_entries,
                            "rate limiter at capacity, rejecting new clients"
                        );
                    }
                    return Err(RateLimitError {
                        retry_after_secs: AT_CAPACITY_RETRY_SECS,
                        reason: RateLimitReason::AtCapacity,
                    });
                }
                entry.insert(Instant::now());
            }
        }

        let key = ip.to_string();
        inner.limiter().check_key(&key).map_err(|not_until| {
            let wait =
                not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
            RateLimitError {
                retry_after_secs: wait.as_secs() + 1,
                reason: RateLimitReason::RateLimited,
            }
        })
    }

    /// Evict idle clients. Returns the number evicted.
    pub fn cleanup(&self) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };

        let now = Instant::now();
        let ttl = inner.entry_ttl;
        let stale: Vec<String> = inner
            .last_seen
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        // remove_if re-checks, so a client seen since the scan is kept.
        let evicted = stale
            .iter()
            .filter(|key| {
                inner
                    .last_seen
                    .remove_if(key.as_str(), |_, seen| now.duration_since(*seen) > ttl)
                    .is_some()
            })
            .count();

        if evicted == 0 {
            return 0;
        }

        let remaining = inner.last_seen.len();
        if inner.should_rebuild(evicted, remaining + evicted, now) {
            inner.rebuild(now);
            tracing::debug!(evicted, remaining, "rebuilt rate limiter after cleanup");
        }
        inner.at_capacity_warned.store(false, Ordering::Relaxed);
        evicted
    }

    /// Number of tracked client IPs.
    pub fn entry_count(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.last_seen.len())
    }

    /// Resolve the client IP for a request.
    fn client_ip(&self, req: &Request<Body>) -> String {
        let Some(inner) = &self.inner else {
            return "unknown".to_string();
        };

        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        let trust_headers = match &peer {
            Some(peer) => inner.trusted_proxies.is_trusted(peer),
            None => matches!(inner.trusted_proxies, TrustedProxies::All),
        };
        if trust_headers && let Some(forwarded) = forwarded_ip(req) {
            return forwarded;
        }

        peer.unwrap_or_else(|| {
            if !inner.connect_info_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "ConnectInfo missing; all clients share one rate limit bucket. \
                     Serve with into_make_service_with_connect_info::<SocketAddr>()."
                );
            }
            "unknown".to_string()
        })
    }
}

/// First address from `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_ip(req: &Request<Body>) -> Option<String> {
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    if let Some(chain) = header("x-forwarded-for")
        && let Some(first) = chain.split(',').next()
        && !first.trim().is_empty()
    {
        return Some(first.trim().to_string());
    }
    header("x-real-ip").map(|ip| ip.trim().to_string())
}

/// Reason for rate limit rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    RateLimited,
    /// Too many distinct clients are tracked to admit a new one.
    AtCapacity,
}

/// Error returned when rate limit is exceeded.
#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after_secs: u64,
    pub reason: RateLimitReason,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let (code, message) = match self.reason {
            RateLimitReason::RateLimited => (
                "rate_limit_exceeded",
                format!(
                    "Rate limit exceeded. Retry after {} seconds.",
                    self.retry_after_secs
                ),
            ),
            RateLimitReason::AtCapacity => (
                "rate_limiter_at_capacity",
                "Server is experiencing high load. Please retry later.".to_string(),
            ),
        };

        let body = serde_json::json!({
            "code": code,
            "message": message,
            "retry_after": self.retry_after_secs,
        });

        (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", self.retry_after_secs.to_string())],
            axum::Json(body),
        )
            .into_response()
    }
}

/// Per-IP rate limiting middleware. Applied outside authentication.
pub async fn ip_rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !rate_limit.is_enabled() {
        return next.run(req).await;
    }

    let ip = rate_limit.client_ip(&req);
    match rate_limit.check_ip(&ip) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Spawn the periodic eviction task.
pub fn spawn_cleanup_task(
    state: RateLimitState,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = state.cleanup();
            if evicted > 0 {
                tracing::info!(evicted, "rate limiter evicted idle clients");
            }
        }
    })
}

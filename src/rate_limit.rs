use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderMap;

use crate::transport::ResponseMeta;

pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Most recent provider-reported quota state.
///
/// Fields absent from the response that produced the snapshot are zero /
/// `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: Option<SystemTime>,
    pub request_id: Option<String>,
    pub observed_at: SystemTime,
}

impl RateLimitSnapshot {
    /// Builds a snapshot from response headers.
    pub fn from_headers(headers: &HeaderMap, request_id: Option<String>) -> Self {
        Self {
            remaining: header_u64(headers, REMAINING_HEADER).unwrap_or(0),
            limit: header_u64(headers, LIMIT_HEADER).unwrap_or(0),
            reset_at: header_u64(headers, RESET_HEADER)
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
            request_id,
            observed_at: SystemTime::now(),
        }
    }

    /// Less than 10% of the quota remains.
    pub fn is_low(&self) -> bool {
        // remaining / limit < 0.10, in integers
        self.limit > 0 && self.remaining.saturating_mul(10) < self.limit
    }
}

/// Thread-safe holder of the latest [`RateLimitSnapshot`].
///
/// Each update swaps in a whole new snapshot; readers always get a complete
/// copy.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    latest: RwLock<Option<Arc<RateLimitSnapshot>>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot with the rate-limit state of `meta`.
    pub fn update(&self, meta: &ResponseMeta) {
        let snapshot = RateLimitSnapshot::from_headers(&meta.headers, meta.request_id.clone());
        self.store(snapshot);
    }

    pub fn store(&self, snapshot: RateLimitSnapshot) {
        #[cfg(feature = "tracing")]
        if snapshot.is_low() {
            tracing::warn!(
                remaining = snapshot.remaining,
                limit = snapshot.limit,
                "rate limit quota running low"
            );
        }

        let snapshot = Arc::new(snapshot);
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Latest snapshot, or `None` before the first update.
    pub fn get(&self) -> Option<RateLimitSnapshot> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            .cloned()
    }

    pub fn is_low(&self) -> bool {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|snapshot| snapshot.is_low())
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

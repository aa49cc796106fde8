//! Admission-control circuit breaker shared by every call on a client.
//!
//! ```text
//! Closed --(threshold server-side failures)--> Open
//! Open   --(success | recovery timeout elapsed)--> Closed
//! ```
//!
//! The recovery transition doubles as the half-open probe: the first
//! admission check after the timeout closes the breaker and lets the call
//! through.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Failures before the breaker opens.
pub const DEFAULT_THRESHOLD: u32 = 5;
/// How long an open breaker rejects calls after the last failure.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct BreakerState {
    failure_count: u32,
    last_failure_at: Option<Instant>,
    is_open: bool,
    threshold: u32,
    recovery_timeout: Duration,
    enabled: bool,
}

/// Point-in-time view of the breaker, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerStatus {
    pub enabled: bool,
    pub is_open: bool,
    pub failure_count: u32,
    pub threshold: u32,
    pub recovery_timeout: Duration,
}

/// Circuit breaker; disabled until [`CircuitBreaker::enable`] or
/// [`CircuitBreaker::configure`] is called.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }
}

impl CircuitBreaker {
    /// Creates a closed, disabled breaker with the given parameters.
    ///
    /// A zero threshold or recovery timeout falls back to the defaults.
    pub fn new(threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                failure_count: 0,
                last_failure_at: None,
                is_open: false,
                threshold: normalize_threshold(threshold),
                recovery_timeout: normalize_recovery(recovery_timeout),
                enabled: false,
            }),
        }
    }

    pub fn enable(&self) {
        self.lock().enabled = true;
    }

    pub fn disable(&self) {
        let mut state = self.lock();
        state.enabled = false;
        state.is_open = false;
        state.failure_count = 0;
    }

    /// Enables the breaker with new parameters.
    pub fn configure(&self, threshold: u32, recovery_timeout: Duration) {
        let mut state = self.lock();
        state.threshold = normalize_threshold(threshold);
        state.recovery_timeout = normalize_recovery(recovery_timeout);
        state.enabled = true;
    }

    /// Returns `true` when calls must be rejected.
    ///
    /// An open breaker whose recovery timeout has elapsed since the last
    /// failure is closed here and admits the caller.
    pub fn is_open(&self) -> bool {
        let mut state = self.lock();
        if !state.enabled || !state.is_open {
            return false;
        }
        let cooled_down = state
            .last_failure_at
            .map_or(true, |at| at.elapsed() > state.recovery_timeout);
        if cooled_down {
            state.is_open = false;
            state.failure_count = 0;
            drop(state);

            #[cfg(feature = "tracing")]
            tracing::info!("circuit breaker recovery timeout elapsed, admitting probe request");

            return false;
        }
        true
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if !state.enabled {
            return;
        }
        state.failure_count = 0;
        state.is_open = false;
    }

    /// Records a server-side failure; returns `true` if this call opened the
    /// breaker.
    pub fn record_failure(&self) -> bool {
        let mut state = self.lock();
        if !state.enabled {
            return false;
        }
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_at = Some(Instant::now());
        if state.failure_count >= state.threshold && !state.is_open {
            state.is_open = true;
            return true;
        }
        false
    }

    pub fn status(&self) -> BreakerStatus {
        let state = self.lock();
        BreakerStatus {
            enabled: state.enabled,
            is_open: state.is_open,
            failure_count: state.failure_count,
            threshold: state.threshold,
            recovery_timeout: state.recovery_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State is always left consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn normalize_threshold(threshold: u32) -> u32 {
    if threshold == 0 {
        DEFAULT_THRESHOLD
    } else {
        threshold
    }
}

fn normalize_recovery(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        DEFAULT_RECOVERY_TIMEOUT
    } else {
        timeout
    }
}

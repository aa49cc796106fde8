//! Bounded retry execution shared by the REST and tool channels.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};

use crate::{
    CallContext, CircuitBreaker, DefaultClassifier, ErrorClassifier, ErrorKind, Interrupt,
    NotionError, Result,
};

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Minimum wait after a rate-limited attempt.
pub const RATE_LIMIT_FLOOR: Duration = Duration::from_secs(1);

const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Retry configuration for one call.
///
/// Zero fields mean "use the default"; see [`RetryPolicy::normalized`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Fills unset fields with defaults and raises `max_backoff` to at least
    /// `base_backoff`.
    pub fn normalized(self) -> Self {
        let or = |value: Duration, default: Duration| {
            if value.is_zero() {
                default
            } else {
                value
            }
        };
        let base_backoff = or(self.base_backoff, DEFAULT_BASE_BACKOFF);
        Self {
            attempt_timeout: or(self.attempt_timeout, DEFAULT_ATTEMPT_TIMEOUT),
            max_attempts: if self.max_attempts == 0 {
                DEFAULT_MAX_ATTEMPTS
            } else {
                self.max_attempts
            },
            base_backoff,
            max_backoff: or(self.max_backoff, DEFAULT_MAX_BACKOFF).max(base_backoff),
        }
    }

    /// Exponential delay before `attempt` (2-based), without jitter or hints.
    ///
    /// Attempt 2 waits `base_backoff`, each later attempt doubles it, capped
    /// at `max_backoff`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(MAX_BACKOFF_EXPONENT);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }

    /// Full wait before `attempt`, given the previous failure.
    ///
    /// A server retry hint replaces the computed delay. Otherwise jitter in
    /// `[0, delay/4)` is added. Rate-limited failures wait at least
    /// [`RATE_LIMIT_FLOOR`] either way.
    pub fn backoff(&self, attempt: u32, kind: ErrorKind, hint: Option<Duration>) -> Duration {
        let delay = match hint {
            Some(hint) => hint,
            None => {
                let delay = self.base_delay(attempt);
                delay + jitter(delay)
            }
        };
        if kind == ErrorKind::RateLimited {
            delay.max(RATE_LIMIT_FLOOR)
        } else {
            delay
        }
    }
}

fn jitter(delay: Duration) -> Duration {
    let quarter = (delay / 4).as_millis() as u64;
    if quarter == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..quarter))
}

/// Method and target of an operation, used to label terminal errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operation {
    pub method: String,
    pub target: String,
}

impl Operation {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
        }
    }
}

/// Runs one logical operation as a bounded sequence of attempts.
///
/// The executor consults the shared [`CircuitBreaker`] before the first
/// attempt and reports the final outcome back to it. Classification is
/// injected so each channel can interpret its own failure shapes.
#[derive(Debug)]
pub struct RetryExecutor<C = DefaultClassifier> {
    breaker: Arc<CircuitBreaker>,
    classifier: C,
}

impl RetryExecutor<DefaultClassifier> {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self::with_classifier(breaker, DefaultClassifier)
    }
}

impl<C: ErrorClassifier> RetryExecutor<C> {
    pub fn with_classifier(breaker: Arc<CircuitBreaker>, classifier: C) -> Self {
        Self {
            breaker,
            classifier,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Executes `op` under `policy`.
    ///
    /// `op` must perform exactly one attempt per call. Terminal failures are
    /// returned as [`NotionError::Failed`]; a rejected admission returns
    /// [`NotionError::CircuitOpen`] without calling `op`.
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &CallContext,
        policy: &RetryPolicy,
        operation: &Operation,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.breaker.is_open() {
            return Err(NotionError::CircuitOpen);
        }

        let policy = policy.normalized();
        let mut previous: Option<(NotionError, ErrorKind)> = None;

        for attempt in 1..=policy.max_attempts {
            if let Some((err, kind)) = &previous {
                let delay = policy.backoff(attempt, *kind, err.retry_after());

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    method = %operation.method,
                    target = %operation.target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    kind = %kind,
                    "retrying after backoff"
                );

                tokio::select! {
                    biased;
                    interrupt = ctx.done() => {
                        let status = err.status();
                        return Err(interrupted(operation, interrupt, attempt - 1, status));
                    }
                    _ = sleep(delay) => {}
                }
            }

            let bound = ctx
                .remaining()
                .map_or(policy.attempt_timeout, |left| left.min(policy.attempt_timeout));
            let outcome = tokio::select! {
                biased;
                interrupt = ctx.done() => {
                    let status = previous.as_ref().and_then(|(err, _)| err.status());
                    return Err(interrupted(operation, interrupt, attempt, status));
                }
                outcome = timeout(bound, op()) => outcome.unwrap_or(Err(NotionError::Timeout(bound))),
            };

            let err = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(err) => err,
            };

            // The caller ending mid-attempt is never the provider's fault.
            if let Some(interrupt) = ctx.check() {
                let status = err.status();
                return Err(interrupted(operation, interrupt, attempt, status));
            }

            let kind = self.classifier.classify(&err);
            if !kind.is_retryable() || attempt == policy.max_attempts {
                return Err(self.give_up(operation, err, kind, attempt));
            }
            previous = Some((err, kind));
        }

        // max_attempts >= 1 after normalization, so the loop always returns.
        Err(NotionError::Config(format!(
            "retry loop for {} {} made no attempts",
            operation.method, operation.target
        )))
    }

    fn give_up(
        &self,
        operation: &Operation,
        err: NotionError,
        kind: ErrorKind,
        attempts: u32,
    ) -> NotionError {
        if kind.is_server_side() && self.breaker.record_failure() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                method = %operation.method,
                target = %operation.target,
                "circuit breaker opened after repeated server-side failures"
            );
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %operation.method,
            target = %operation.target,
            attempts,
            kind = %kind,
            error = %err,
            "operation failed"
        );

        NotionError::Failed {
            method: operation.method.clone(),
            target: operation.target.clone(),
            kind,
            attempts,
            status: err.status(),
            source: Box::new(err),
        }
    }
}

fn interrupted(
    operation: &Operation,
    interrupt: Interrupt,
    attempts: u32,
    status: Option<u16>,
) -> NotionError {
    let kind = match interrupt {
        Interrupt::Canceled => ErrorKind::Canceled,
        Interrupt::DeadlineExceeded => ErrorKind::Timeout,
    };
    NotionError::Failed {
        method: operation.method.clone(),
        target: operation.target.clone(),
        kind,
        attempts,
        status,
        source: Box::new(interrupt.into()),
    }
}

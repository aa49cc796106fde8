use std::future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::NotionError;

/// Why a [`CallContext`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Canceled,
    DeadlineExceeded,
}

impl From<Interrupt> for NotionError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Canceled => NotionError::Canceled,
            Interrupt::DeadlineExceeded => NotionError::DeadlineExceeded,
        }
    }
}

/// Caller-side cancellation and deadline for one logical operation.
///
/// Cloning shares the cancellation token, so a clone handed to another task
/// can cancel the original. Use [`CallContext::child`] to derive a context
/// that can be canceled on its own.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that ends `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(Instant::now() + timeout)
    }

    /// Context that ends at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::new().deadline(deadline)
    }

    /// Context bound to an existing cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Tightens the deadline, keeping an earlier one if already present.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derived context: canceled with its parent, cancelable on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns the interruption if the context has already ended.
    pub fn check(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            Some(Interrupt::Canceled)
        } else if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            Some(Interrupt::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves when the context is canceled or its deadline passes.
    pub async fn done(&self) -> Interrupt {
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Interrupt::Canceled,
            _ = deadline => Interrupt::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{CallContext, Interrupt};

    #[tokio::test(start_paused = true)]
    async fn deadline_ends_context() {
        let ctx = CallContext::with_timeout(Duration::from_secs(2));
        assert_eq!(ctx.check(), None);
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(2)));
        assert_eq!(ctx.done().await, Interrupt::DeadlineExceeded);
        assert_eq!(ctx.check(), Some(Interrupt::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_deadline_wins() {
        let now = Instant::now();
        let ctx = CallContext::with_deadline(now + Duration::from_secs(5))
            .deadline(now + Duration::from_secs(1))
            .deadline(now + Duration::from_secs(9));
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(1)));
        assert_eq!(ctx.done().await, Interrupt::DeadlineExceeded);
    }

    #[tokio::test]
    async fn cancel_wins_over_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_secs(60));
        ctx.cancel();
        assert_eq!(ctx.done().await, Interrupt::Canceled);
    }

    #[test]
    fn child_cancellation_is_isolated() {
        let parent = CallContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn no_deadline_means_no_remaining() {
        assert_eq!(CallContext::new().remaining(), None);
    }
}

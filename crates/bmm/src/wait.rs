//! Cooperative polling.
//!
//! Machines signal progress only by writing marker files and rebooting, so
//! every workflow step is a poll. [`Poller`] sleeps between checks while
//! honoring a cancellation token and an optional deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BmmError, Result};

/// Interval/deadline pair for a poll loop.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
    deadline: Option<Duration>,
}

impl Poller {
    /// Poller without a deadline.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Bound the total wait.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run `check` until it yields a value.
    ///
    /// # Errors
    /// Propagates errors from `check`; returns [`BmmError::Cancelled`] once
    /// `cancel` fires and [`BmmError::Timeout`] when the deadline elapses.
    pub async fn until<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        mut check: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let start = Instant::now();
        let mut attempts: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(BmmError::Cancelled(what.to_string()));
            }

            attempts += 1;
            if let Some(value) = check().await? {
                debug!(what, attempts, elapsed_secs = start.elapsed().as_secs(), "Wait satisfied");
                return Ok(value);
            }

            if let Some(deadline) = self.deadline {
                if start.elapsed() >= deadline {
                    return Err(BmmError::Timeout {
                        what: what.to_string(),
                        secs: deadline.as_secs(),
                    });
                }
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(BmmError::Cancelled(what.to_string()));
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Run `op` unless `cancel` fires first.
///
/// An already cancelled token wins without polling `op`.
///
/// # Errors
/// Returns [`BmmError::Cancelled`] on cancellation, else the result of `op`.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    what: &str,
    op: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(BmmError::Cancelled(what.to_string())),
        result = op => result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_until_returns_first_value() {
        let poller = Poller::new(Duration::from_millis(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let value = poller
            .until(&cancel, "third call", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok((n == 3).then_some(n))
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_until_propagates_check_error() {
        let poller = Poller::new(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let result: Result<()> = poller
            .until(&cancel, "failing", || async {
                Err(BmmError::InstanceNotFound("i-1".into()))
            })
            .await;
        assert!(matches!(result, Err(BmmError::InstanceNotFound(_))));
    }

    #[tokio::test]
    async fn test_until_honors_cancellation() {
        let poller = Poller::new(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<()> = poller.until(&cancel, "never", || async { Ok(None) }).await;
        assert!(matches!(result, Err(BmmError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_until_times_out() {
        let poller = Poller::new(Duration::from_millis(2)).with_deadline(Some(Duration::from_millis(10)));
        let cancel = CancellationToken::new();
        let result: Result<()> = poller.until(&cancel, "never", || async { Ok(None) }).await;
        assert!(matches!(result, Err(BmmError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancellable_skips_op_once_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        let result = cancellable(&cancel, "power on", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(BmmError::Cancelled(what)) if what == "power on"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellable_interrupts_pending_op() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<()> = cancellable(&cancel, "image fetch", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(BmmError::Cancelled(_))));
    }
}

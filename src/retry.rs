//! Retry policy for transient failures.
//!
//! The legacy behaviour of the mirror is "retry until success" with no
//! delay between attempts. [`RetryPolicy::default`] reproduces that; a
//! bounded policy turns an endless loop into
//! [`MirrorError::RetriesExhausted`] so a stalled page surfaces as a failed
//! volume instead of a counter that stops moving.

use crate::error::{MirrorError, Result};
use backoff::backoff::{Backoff, Constant, Zero};
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    None,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: BackoffKind,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            backoff: BackoffKind::None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            ..Self::unbounded()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffKind, initial: Duration, max: Duration) -> Self {
        self.backoff = backoff;
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    fn schedule(&self) -> Box<dyn Backoff + Send> {
        match self.backoff {
            BackoffKind::None => Box::new(Zero {}),
            BackoffKind::Fixed => Box::new(Constant::new(self.initial_delay)),
            BackoffKind::Exponential => Box::new(
                ExponentialBackoffBuilder::new()
                    .with_initial_interval(self.initial_delay)
                    .with_max_interval(self.max_delay.max(self.initial_delay))
                    .with_max_elapsed_time(None)
                    .build(),
            ),
        }
    }

    /// Drives `operation` until it succeeds, fails with a non-transient
    /// error, exhausts the attempt cap, or `cancel` fires.
    pub async fn run<F, Fut, T>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut schedule = self.schedule();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }

            attempt = attempt.saturating_add(1);
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation = operation_name, attempts = attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            if self.max_attempts.is_some_and(|max| attempt >= max) {
                error!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %err,
                    "Retry attempts exhausted"
                );
                return Err(MirrorError::RetriesExhausted {
                    operation: operation_name.to_string(),
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = schedule.next_backoff().unwrap_or(self.max_delay);
            warn!(
                operation = operation_name,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );

            if delay.is_zero() {
                // Yield so an endless zero-delay loop cannot starve sibling tasks.
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn flaky(failures: u32, counter: Arc<AtomicU32>) -> impl FnMut() -> futures::future::Ready<Result<u32>> {
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                futures::future::ready(Err(MirrorError::scraping("not rendered yet")))
            } else {
                futures::future::ready(Ok(n))
            }
        }
    }

    #[tokio::test]
    async fn unbounded_policy_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryPolicy::unbounded()
            .run("page", &CancellationToken::new(), flaky(25, calls.clone()))
            .await
            .unwrap();

        assert_eq!(result, 26);
        assert_eq!(calls.load(Ordering::SeqCst), 26);
    }

    #[tokio::test]
    async fn bounded_policy_reports_exhaustion() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = RetryPolicy::bounded(3)
            .run("page", &CancellationToken::new(), flaky(10, calls.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = RetryPolicy::unbounded()
            .run("page", &CancellationToken::new(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(Err::<(), _>(MirrorError::MissingUrl))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::MissingUrl));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff_sleep() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::unbounded().with_backoff(
            BackoffKind::Fixed,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let calls = Arc::new(AtomicU32::new(0));
        let err = policy.run("page", &cancel, flaky(u32::MAX, calls)).await.unwrap_err();
        assert!(matches!(err, MirrorError::Cancelled));
    }
}

//! Retry with exponential backoff around a single network call.
//!
//! Transient failures (rate limits, transport errors, generic provider
//! errors) are re-attempted up to the attempt cap; fatal failures and
//! cancellation propagate immediately. The wait before retry `n` is
//! `multiplier * 2^(n-1)` seconds clamped to `[min_delay, max_delay]`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetrySettings;
use crate::error::Error;
use crate::Result;

/// Decides whether an error may be retried.
pub type Classifier = fn(&Error) -> bool;

/// Reusable backoff executor.
#[derive(Clone)]
pub struct RetryPolicy {
    settings: RetrySettings,
    classifier: Classifier,
    label: String,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("settings", &self.settings)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Policy using [`Error::is_retryable`] as the classifier.
    pub fn new(settings: RetrySettings, label: impl Into<String>) -> Self {
        Self {
            settings,
            classifier: Error::is_retryable,
            label: label.into(),
        }
    }

    /// Replace the retry/fatal classifier.
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.settings.max_attempts.max(1)
    }

    /// Wait before the next attempt after `failed_attempts` failures (1-indexed).
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(63) as i32;
        let raw = self.settings.multiplier_secs * 2f64.powi(exponent);
        let floor = self.settings.min_delay_secs.max(0.0);
        let ceiling = self.settings.max_delay_secs.max(floor);
        let secs = raw.min(ceiling).max(floor);
        Duration::from_secs_f64(if secs.is_finite() { secs } else { ceiling })
    }

    /// Run `operation` until it succeeds, fails fatally, exhausts the
    /// attempt cap, or `cancel` fires.
    ///
    /// Cancellation aborts both an in-flight attempt and a pending backoff
    /// sleep, returning [`Error::Cancelled`].
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = operation() => result,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !(self.classifier)(&err) {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(
                    "{}: giving up after {} attempt(s): {}",
                    self.label, attempt, err
                );
                return Err(err);
            }

            let delay = self.delay_after(attempt);
            warn!(
                "{}: attempt {}/{} failed ({}), retrying in {:.1}s",
                self.label,
                attempt,
                max_attempts,
                err,
                delay.as_secs_f64()
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn rate_limited() -> Error {
        Error::RateLimited {
            provider: "test".into(),
            message: "slow down".into(),
        }
    }

    #[test]
    fn test_default_delays_follow_backoff_schedule() {
        let policy = RetryPolicy::new(RetrySettings::default(), "test");
        assert_eq!(policy.delay_after(1), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
        assert_eq!(policy.delay_after(6), Duration::from_secs(32));
        assert_eq!(policy.delay_after(7), Duration::from_secs(60));
        assert_eq!(policy.delay_after(50), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_never_below_floor_or_above_ceiling() {
        let policy = RetryPolicy::new(
            RetrySettings {
                max_attempts: 5,
                multiplier_secs: 0.5,
                min_delay_secs: 1.0,
                max_delay_secs: 3.0,
            },
            "test",
        );
        for n in 1..20 {
            let d = policy.delay_after(n);
            assert!(d >= Duration::from_secs(1), "n={n} d={d:?}");
            assert!(d <= Duration::from_secs(3), "n={n} d={d:?}");
        }
    }

    #[tokio::test]
    async fn test_retryable_error_exhausts_attempt_cap() {
        let policy = RetryPolicy::new(RetrySettings::immediate(4), "test");
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(&CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(rate_limited())
            })
            .await;

        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, Error::RateLimited { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_error_is_attempted_once() {
        let policy = RetryPolicy::new(RetrySettings::immediate(10), "test");
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(&CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidArgument("bad type".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let policy = RetryPolicy::new(RetrySettings::immediate(5), "test");
        let calls = AtomicU32::new(0);

        let value = policy
            .execute(&CancellationToken::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(tokio_test::assert_ok!(value), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        fn never(_: &Error) -> bool {
            false
        }
        let policy = RetryPolicy::new(RetrySettings::immediate(5), "test").with_classifier(never);
        let calls = AtomicU32::new(0);

        let _ = policy
            .execute(&CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(rate_limited())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff_sleep() {
        let policy = RetryPolicy::new(
            RetrySettings {
                max_attempts: 10,
                multiplier_secs: 60.0,
                min_delay_secs: 60.0,
                max_delay_secs: 60.0,
            },
            "test",
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let result: Result<()> = policy
            .execute(&cancel, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(rate_limited())
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_attempt() {
        let policy = RetryPolicy::new(RetrySettings::immediate(3), "test");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(&cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

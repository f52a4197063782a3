//! Fixed-delay retry and polling shared by onboarding and monitoring.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};

use crate::error::ProviderError;

/// Retry budget for provider calls. Only transient errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub const fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub const fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }
}

/// Result of a retried call together with the number of attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,
    pub attempts: usize,
}

/// Run `op` and retry transient provider errors according to `policy`.
///
/// Terminal errors (`NotFound`, `Rejected`, `Decode`) return immediately.
/// The number of attempts never exceeds `policy.max_attempts()`.
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = AtomicUsize::new(0);
    let backoff = ConstantBuilder::default()
        .with_delay(policy.delay)
        .with_max_times(policy.max_retries);

    let result = (|| {
        attempts.fetch_add(1, Ordering::Relaxed);
        op()
    })
    .retry(backoff)
    .sleep(tokio::time::sleep)
    .when(|err: &ProviderError| err.is_transient())
    .notify(|err: &ProviderError, delay: Duration| {
        tracing::warn!(
            operation,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying provider call"
        );
    })
    .await;

    RetryOutcome {
        result,
        attempts: attempts.load(Ordering::Relaxed),
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// Call `check` up to `max_polls` times, sleeping `delay` between pending answers.
///
/// Returns `Ok(None)` if the value never became ready.
pub async fn poll_until_ready<T, E, F, Fut>(
    max_polls: usize,
    delay: Duration,
    mut check: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>, E>>,
{
    for poll in 1..=max_polls.max(1) {
        match check().await? {
            Poll::Ready(value) => return Ok(Some(value)),
            Poll::Pending if poll < max_polls => tokio::time::sleep(delay).await,
            Poll::Pending => {}
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn zero_delay(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::ZERO)
    }

    #[tokio::test]
    async fn succeeds_within_budget() {
        let calls = AtomicUsize::new(0);
        let outcome = retry_transient(zero_delay(2), "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ProviderError::transient("flaky"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(outcome.result.expect("third attempt succeeds"), 3);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn attempts_never_exceed_budget() {
        let calls = AtomicUsize::new(0);
        let outcome: RetryOutcome<()> = retry_transient(zero_delay(2), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::transient("down"))
        })
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let outcome: RetryOutcome<()> = retry_transient(zero_delay(5), "test", || async {
            Err(ProviderError::NotFound {
                cnj: "1234567-12.2023.8.09.0001".to_string(),
            })
        })
        .await;

        assert!(matches!(outcome.result, Err(ProviderError::NotFound { .. })));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn poll_returns_first_ready_value() {
        let calls = AtomicUsize::new(0);
        let value: Option<&str> = poll_until_ready(5, Duration::ZERO, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>(if n < 2 { Poll::Pending } else { Poll::Ready("done") })
        })
        .await
        .expect("poll");

        assert_eq!(value, Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_gives_up_after_max_polls() {
        let calls = AtomicUsize::new(0);
        let value: Option<()> = poll_until_ready(4, Duration::ZERO, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>(Poll::Pending)
        })
        .await
        .expect("poll");

        assert_eq!(value, None);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}

//! Retry executor (C7): loops over an operation, consulting the policy and
//! backoff strategy, cooperative with cancellation, emitting an on-retry
//! callback.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::retry::backoff::BackoffStrategy;
use crate::retry::policy::RetryPolicy;

/// Runs on the calling task; never spawns. `on_retry` is invoked with
/// `(attempt, &err, delay)` before each wait and may be used for logging or
/// metrics; its return value is ignored.
pub async fn execute<F, Fut, T>(
    policy: &RetryPolicy,
    backoff: &mut dyn BackoffStrategy,
    cancellation: &CancellationToken,
    mut operation: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    execute_with_callback(policy, backoff, cancellation, &mut operation, |_, _, _| {}).await
}

/// Like [`execute`] but also takes an `on_retry(attempt, err, delay)` callback.
pub async fn execute_with_callback<F, Fut, T>(
    policy: &RetryPolicy,
    backoff: &mut dyn BackoffStrategy,
    cancellation: &CancellationToken,
    operation: &mut F,
    mut on_retry: impl FnMut(u32, &PipelineError, Duration),
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    backoff.reset();
    let mut attempt = 0u32;
    loop {
        if cancellation.is_cancelled() {
            return Err(PipelineError::Cancelled {
                attempts: attempt,
                source: Box::new(PipelineError::BadRequestShape(
                    "context cancelled before attempt".into(),
                )),
            });
        }

        let result = operation().await;
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !policy.should_retry(&err, attempt) {
            return Err(if attempt >= policy.max_retries {
                PipelineError::MaxRetriesExceeded {
                    source: Box::new(err),
                }
            } else {
                PipelineError::NonRetryable {
                    source: Box::new(err),
                }
            });
        }

        let delay = backoff.next_delay(attempt, &err);
        debug!(attempt, ?delay, "retrying after transient error");
        on_retry(attempt, &err, delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancellation.cancelled() => {
                warn!(attempt, "retry loop cancelled during wait");
                return Err(PipelineError::Cancelled {
                    attempts: attempt + 1,
                    source: Box::new(err),
                });
            }
        }

        attempt += 1;
    }
}

/// Like [`execute`] but returns the last partial `T` alongside the error so
/// callers can salvage partial state, when `operation` can produce one even
/// on failure.
pub async fn execute_typed<F, Fut, T>(
    policy: &RetryPolicy,
    backoff: &mut dyn BackoffStrategy,
    cancellation: &CancellationToken,
    mut operation: F,
) -> (Option<T>, Option<PipelineError>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = (Option<T>, Option<PipelineError>)>,
{
    backoff.reset();
    let mut attempt = 0u32;
    let mut last_partial: Option<T> = None;
    loop {
        if cancellation.is_cancelled() {
            return (
                last_partial,
                Some(PipelineError::Cancelled {
                    attempts: attempt,
                    source: Box::new(PipelineError::BadRequestShape(
                        "context cancelled before attempt".into(),
                    )),
                }),
            );
        }

        let (partial, err) = operation().await;
        last_partial = partial;
        let Some(err) = err else {
            return (last_partial, None);
        };

        if !policy.should_retry(&err, attempt) {
            let wrapped = if attempt >= policy.max_retries {
                PipelineError::MaxRetriesExceeded {
                    source: Box::new(err),
                }
            } else {
                PipelineError::NonRetryable {
                    source: Box::new(err),
                }
            };
            return (last_partial, Some(wrapped));
        }

        let delay = backoff.next_delay(attempt, &err);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancellation.cancelled() => {
                return (
                    last_partial,
                    Some(PipelineError::Cancelled {
                        attempts: attempt + 1,
                        source: Box::new(err),
                    }),
                );
            }
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::backoff::{ExponentialBackoff, JitterType};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter_backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(10), 2.0)
            .with_jitter(JitterType::None)
    }

    #[tokio::test]
    async fn s1_first_attempt_success() {
        let policy = RetryPolicy::default_policy();
        let mut backoff = no_jitter_backoff();
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), PipelineError> = execute(&policy, &mut backoff, &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn s2_transient_then_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(100), 2.0, 0.0);
        let mut backoff = no_jitter_backoff();
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), PipelineError> = execute(&policy, &mut backoff, &token, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::from_status(503, "busy"))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn s3_exhausted_retries() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(10), 2.0, 0.0);
        let mut backoff = no_jitter_backoff();
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), PipelineError> = execute(&policy, &mut backoff, &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::from_status(503, "busy")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().to_string().contains("max retries"));
    }

    #[tokio::test]
    async fn s4_non_retryable_stops_immediately() {
        let policy = RetryPolicy::default_policy();
        let mut backoff = no_jitter_backoff();
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), PipelineError> = execute(&policy, &mut backoff, &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::from_status(400, "bad")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.unwrap_err().to_string().contains("non-retryable"));
    }

    #[tokio::test]
    async fn cancellation_aborts_loop() {
        let policy = RetryPolicy::new(5, Duration::from_secs(30), Duration::from_secs(60), 2.0, 0.0);
        let mut backoff = no_jitter_backoff();
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), PipelineError> = execute(&policy, &mut backoff, &token, || async {
            Err(PipelineError::from_status(503, "busy"))
        })
        .await;
        assert!(matches!(result, Err(PipelineError::Cancelled { .. })));
    }
}

//! Retry logic.
//!
//! # Responsibilities
//! - Run one logical operation for at most `max_retries + 1` attempts
//! - Bind every attempt to its own deadline
//! - Back off exponentially, honour server delay hints, add jitter
//!
//! # Design Decisions
//! - Attempts for one call are strictly sequential
//! - Non-retryable categories return immediately without consuming attempts
//! - The deadline timer is owned by the attempt future and dropped with it on every exit path

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{AttemptError, RetryFailure};
use crate::observability::metrics;
use crate::resilience::backoff::retry_delay;

/// Per-call retry bookkeeping. Dropped when the call completes.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    last_error: Option<AttemptError>,
    computed_delay: Option<Duration>,
}

/// Execute `operation` with retries.
///
/// `operation` receives the 0-based attempt number. Each attempt is cancelled
/// once `deadline` elapses and counts as a `Timeout` failure.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryConfig,
    deadline: Duration,
    endpoint: &str,
    mut operation: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut state = RetryState::default();

    loop {
        let outcome = match tokio::time::timeout(deadline, operation(state.attempt)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AttemptError::timeout(deadline)),
        };

        let error = match outcome {
            Ok(value) => {
                if state.attempt > 0 {
                    tracing::debug!(
                        endpoint = %endpoint,
                        attempts = state.attempt + 1,
                        previous_error = ?state.last_error.as_ref().map(|e| e.category),
                        "Request succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        state.attempt += 1;

        if !error.category.is_retryable() {
            return Err(RetryFailure {
                error,
                attempts: state.attempt,
            });
        }

        if state.attempt > policy.max_retries {
            tracing::error!(
                endpoint = %endpoint,
                attempts = state.attempt,
                category = %error.category,
                last_delay = ?state.computed_delay,
                error = %error,
                "Retries exhausted"
            );
            let attempts = state.attempt;
            return Err(RetryFailure {
                error: error.exhausted(attempts),
                attempts,
            });
        }

        let delay = retry_delay(policy, state.attempt - 1, error.category, error.retry_after);
        tracing::warn!(
            endpoint = %endpoint,
            attempt = state.attempt,
            delay = ?delay,
            status = ?error.status,
            category = %error.category,
            "Retrying request"
        );
        metrics::record_retry(endpoint, error.category);

        state.computed_delay = Some(delay);
        state.last_error = Some(error);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            jitter_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_count_is_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(&policy(3), Duration::from_secs(5), "/t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::from_status_parts(503, None, String::new())) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(failure.attempts, 4);
        assert!(failure.error.message.contains("Service Unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(&policy(3), Duration::from_secs(5), "/t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::from_status_parts(400, None, String::new())) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.error.category, ErrorCategory::ClientError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let result = execute_with_retry(&policy(3), Duration::from_secs(5), "/t", |attempt| async move {
            if attempt == 0 {
                Err(AttemptError::from_status_parts(429, None, String::new()))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_deadline_fires() {
        let result: Result<(), _> = execute_with_retry(&policy(1), Duration::from_millis(50), "/t", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.error.category, ErrorCategory::Timeout);
        assert_eq!(failure.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_capped() {
        let mut policy = policy(1);
        policy.max_delay_ms = 1000;
        policy.jitter_ms = 500;

        let start = Instant::now();
        let result = execute_with_retry(&policy, Duration::from_secs(5), "/t", |attempt| async move {
            if attempt == 0 {
                Err(AttemptError::from_status_parts(429, None, String::new())
                    .with_retry_after(Duration::from_secs(3600)))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(1000), "waited {:?}", waited);
        assert!(waited <= Duration::from_millis(1500), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_between_attempts() {
        let start = Instant::now();
        let stamps = std::sync::Mutex::new(Vec::new());
        let _: Result<(), _> = execute_with_retry(&policy(2), Duration::from_secs(5), "/t", |_| {
            stamps.lock().unwrap().push(start.elapsed());
            async { Err(AttemptError::new(ErrorCategory::Network, "connection refused")) }
        })
        .await;

        let stamps = stamps.into_inner().unwrap();
        assert_eq!(stamps.len(), 3);
        assert_eq!(stamps[1] - stamps[0], Duration::from_millis(100));
        assert_eq!(stamps[2] - stamps[1], Duration::from_millis(200));
    }
}

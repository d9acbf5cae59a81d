//! Call-level retry with per-attempt timeout budgets.
//!
//! Retry governs *calls* over an established connection, never the dial
//! itself. Each attempt gets its own timeout budget from the policy, so the
//! total latency of a retried call is not bounded by the dial timeout.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{
    config::RetryPolicy,
    error::{BrokerError, Result},
};

/// Executes an async operation under a retry policy, racing cancellation.
///
/// Semantics:
/// - Each attempt runs under `policy.per_attempt_timeout`; an attempt that
///   exceeds its budget counts as a retryable [`BrokerError::Timeout`].
/// - Non-retryable errors (per [`BrokerError::is_retryable`]) return
///   immediately without further attempts.
/// - After `policy.max_attempts` failed attempts the last retryable error is
///   wrapped in [`BrokerError::RetryExhausted`].
/// - Between attempts the jittered `policy.backoff` is slept, also raced
///   against the token.
/// - Cancellation during an attempt drops the in-flight future and returns
///   [`BrokerError::Cancelled`]; an already-cancelled token fails fast.
///
/// # Example
///
/// ```ignore
/// use channel_broker::{with_call_retry, RetryPolicy, BrokerError};
/// use tokio_util::sync::CancellationToken;
///
/// let policy = RetryPolicy::default();
/// let token = CancellationToken::new();
/// let result = with_call_retry(&policy, &token, || async {
///     Ok::<_, BrokerError>("success")
/// }).await;
/// ```
pub async fn with_call_retry<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(BrokerError::Cancelled);
    }

    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let budget = policy.per_attempt_timeout;
        let result = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(BrokerError::Cancelled);
            }
            outcome = tokio::time::timeout(budget, operation()) => match outcome {
                Ok(inner) => inner,
                Err(_) => Err(BrokerError::Timeout { duration_ms: budget.as_millis() as u64 }),
            },
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= policy.max_attempts {
            return Err(BrokerError::RetryExhausted {
                attempts: attempt,
                last_error: err.to_string(),
            });
        }

        let backoff = apply_jitter(policy.backoff, policy.jitter);
        tracing::debug!(
            attempt = attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "retrying after backoff"
        );

        tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(BrokerError::Cancelled);
            }
            () = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Applies jitter to a duration.
///
/// Randomizes in the range `[dur * (1 - factor), dur * (1 + factor)]` to
/// prevent thundering herd when many clients retry simultaneously.
fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();

    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rng.random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use tonic::Code;

    use super::*;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(10),
            jitter: 0.0, // deterministic tests
        }
    }

    fn unavailable() -> BrokerError {
        BrokerError::Rpc { code: Code::Unavailable, message: "server down".to_owned() }
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = with_call_retry(&test_policy(), &CancellationToken::new(), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BrokerError>("ok")
            }
        })
        .await;

        assert_eq!(result.expect("should succeed"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = with_call_retry(&test_policy(), &CancellationToken::new(), || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.expect("should succeed after retries"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = with_call_retry(&test_policy(), &CancellationToken::new(), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BrokerError::Rpc {
                    code: Code::InvalidArgument,
                    message: "bad request".to_owned(),
                })
            }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            BrokerError::Rpc { code: Code::InvalidArgument, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = with_call_retry(&test_policy(), &CancellationToken::new(), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            }
        })
        .await;

        match result.unwrap_err() {
            BrokerError::RetryExhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("server down"));
            },
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn per_attempt_timeout_is_retried() {
        let policy = RetryPolicy {
            max_attempts: 2,
            per_attempt_timeout: Duration::from_millis(20),
            backoff: Duration::from_millis(1),
            jitter: 0.0,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = with_call_retry(&policy, &CancellationToken::new(), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result.unwrap_err(), BrokerError::RetryExhausted { attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn already_cancelled_fails_fast() {
        let token = CancellationToken::new();
        token.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = with_call_retry(&test_policy(), &token, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(matches!(result.unwrap_err(), BrokerError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_inflight_attempt() {
        let token = CancellationToken::new();
        let cancel = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let policy = RetryPolicy {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_secs(30),
            backoff: Duration::from_millis(1),
            jitter: 0.0,
        };
        let result: Result<()> = with_call_retry(&policy, &token, || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result.unwrap_err(), BrokerError::Cancelled));
    }

    #[test]
    fn jitter_zero_factor_is_identity() {
        let dur = Duration::from_millis(100);
        assert_eq!(apply_jitter(dur, 0.0), dur);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let dur = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = apply_jitter(dur, 0.25);
            assert!(jittered >= Duration::from_millis(75));
            assert!(jittered <= Duration::from_millis(125));
        }
    }
}

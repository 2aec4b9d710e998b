//! Retry-until-valid orchestration.
//!
//! A model call can fail outright (transport, malformed JSON) or succeed with
//! output that is useless to the caller. Both are one failed attempt here:
//! the caller supplies the operation and the validity check, this module
//! supplies the loop.

use crate::models::{Result, SensemakeError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Fixed delay between consecutive attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` of zero is treated as one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Worst-case time spent sleeping between attempts.
    pub fn max_total_delay(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(10))
    }
}

/// A value accepted by the retry loop, with the attempt it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

impl<T> Attempted<T> {
    /// Failed attempts before the accepted one.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Run `operation` until `is_valid` accepts its result.
///
/// Attempts are strictly sequential. An `Err` from the operation is logged
/// and counts as an invalid attempt; it is never returned. After
/// `policy.max_attempts` invalid attempts the call fails with
/// [`SensemakeError::RetryExhausted`] naming `label`.
pub async fn retry_call<T, Op, Fut, Valid>(
    operation: Op,
    is_valid: Valid,
    policy: &RetryPolicy,
    label: &str,
) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    Valid: FnMut(&T) -> bool,
{
    retry_call_counted(operation, is_valid, policy, label)
        .await
        .map(|attempted| attempted.value)
}

/// Same as [`retry_call`], but also reports how many attempts it took.
pub async fn retry_call_counted<T, Op, Fut, Valid>(
    mut operation: Op,
    mut is_valid: Valid,
    policy: &RetryPolicy,
    label: &str,
) -> Result<Attempted<T>>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    Valid: FnMut(&T) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) if is_valid(&value) => {
                if attempt > 1 {
                    info!(label, attempt, "Succeeded after retries");
                } else {
                    debug!(label, "Succeeded on first attempt");
                }
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Ok(_) => {
                warn!(label, attempt, max_attempts, "Result failed validation");
            }
            Err(e) => {
                let raw = e.raw_output().map(|r| truncate(r, 200));
                warn!(label, attempt, max_attempts, error = %e, raw = ?raw, "Attempt failed");
            }
        }

        if attempt < max_attempts {
            info!(label, delay_secs = policy.delay.as_secs(), "Retrying");
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(SensemakeError::RetryExhausted {
        label: label.to_string(),
        attempts: max_attempts,
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn immediate(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_always_failing_operation_runs_exactly_max_attempts() {
        for n in 1..=5 {
            let calls = &AtomicU32::new(0);
            let result: Result<String> = retry_call(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SensemakeError::Internal("boom".to_string()))
                },
                |_| true,
                &immediate(n),
                "always fails",
            )
            .await;

            assert_eq!(calls.load(Ordering::SeqCst), n);
            match result {
                Err(SensemakeError::RetryExhausted { label, attempts }) => {
                    assert_eq!(label, "always fails");
                    assert_eq!(attempts, n);
                }
                other => panic!("expected RetryExhausted, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_returns_third_attempt_when_first_two_are_invalid() {
        let calls = &AtomicU32::new(0);
        let result = retry_call(
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if n < 3 { "bad" } else { "good" }.to_string())
            },
            |v: &String| v == "good",
            &immediate(3),
            "bad then good",
        )
        .await
        .unwrap();

        assert_eq!(result, "good");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_first_valid_attempt() {
        for k in 1..=4u32 {
            let calls = &AtomicU32::new(0);
            let value = retry_call(
                move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) },
                |attempt: &u32| *attempt == k,
                &immediate(10),
                "valid at k",
            )
            .await
            .unwrap();

            assert_eq!(value, k);
            assert_eq!(calls.load(Ordering::SeqCst), k);
        }
    }

    #[tokio::test]
    async fn test_errors_and_invalid_values_share_the_budget() {
        let calls = &AtomicU32::new(0);
        let result = retry_call(
            move || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(SensemakeError::parse("not json", "{oops")),
                    1 => Ok(Vec::<u32>::new()),
                    _ => Ok(vec![1, 2]),
                }
            },
            |v: &Vec<u32>| !v.is_empty(),
            &immediate(3),
            "mixed failures",
        )
        .await
        .unwrap();

        assert_eq!(result, vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_valid_result_is_not_returned() {
        let result = retry_call(
            || async { Ok("almost") },
            |_| false,
            &immediate(2),
            "never valid",
        )
        .await;
        assert!(matches!(
            result,
            Err(SensemakeError::RetryExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_delay_between_attempts_only() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let start = tokio::time::Instant::now();

        let result: Result<()> = retry_call(
            || async { Err(SensemakeError::Internal("down".to_string())) },
            |_| true,
            &policy,
            "paced",
        )
        .await;

        assert!(result.is_err());
        let elapsed = start.elapsed();
        assert!(elapsed >= policy.max_total_delay());
        assert!(elapsed < policy.max_total_delay() + Duration::from_secs(1));
        assert_eq!(policy.max_total_delay(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_counted_reports_accepted_attempt() {
        let calls = &AtomicU32::new(0);
        let attempted = retry_call_counted(
            move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) },
            |n: &u32| *n == 3,
            &immediate(5),
            "counted",
        )
        .await
        .unwrap();

        assert_eq!(attempted.value, 3);
        assert_eq!(attempted.attempts, 3);
        assert_eq!(attempted.retries(), 2);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}

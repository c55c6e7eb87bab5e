//! Retry-with-backoff shared by every network call site.
//!
//! The text model, the image model and image downloads all retry the same
//! way: run an operation up to `attempts` times, sleeping between attempts
//! according to a [`Backoff`] schedule. Sleeping goes through the tokio
//! clock, so tests with paused time run instantly.

use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Same delay before every retry.
    Fixed(Duration),
    /// `step * n` before retry `n` (1-indexed).
    Linear(Duration),
    /// `base * 2^(n-1)` before retry `n`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (1 = first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Linear(step) => step.saturating_mul(retry),
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Attempt cap plus delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always ≥ 1.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Backoff) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no retry.
    pub fn once() -> Self {
        Self::new(1, Backoff::None)
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the 0-indexed attempt number. Returns the last error.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: RetryPolicy, label: &str, op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(policy, label, op, |_| true).await
}

/// Like [`retry_with_backoff`], but stops early when `should_retry` returns
/// false for an error.
pub async fn retry_with_backoff_if<T, E, F, Fut, P>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = policy.backoff.delay(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    target: "edgequake_storybook::retry",
                    "{label}: attempt {}/{} failed: {e}",
                    attempt + 1,
                    attempts
                );
                attempt += 1;
                if attempt >= attempts || !should_retry(&e) {
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_schedules() {
        let s = Duration::from_millis(500);
        assert_eq!(Backoff::None.delay(3), Duration::ZERO);
        assert_eq!(Backoff::Fixed(s).delay(3), s);
        assert_eq!(Backoff::Linear(s).delay(1), s);
        assert_eq!(Backoff::Linear(s).delay(3), Duration::from_millis(1500));

        let exp = Backoff::Exponential {
            base: s,
            max: Duration::from_secs(3),
        };
        assert_eq!(exp.delay(1), Duration::from_millis(500));
        assert_eq!(exp.delay(2), Duration::from_millis(1000));
        assert_eq!(exp.delay(3), Duration::from_millis(2000));
        assert_eq!(exp.delay(4), Duration::from_secs(3));
        assert_eq!(exp.delay(40), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy::new(3, Backoff::Linear(Duration::from_secs(1)));

        let result: Result<u32, String> = retry_with_backoff(policy, "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(format!("fail {attempt}"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s before retry 1, 2s before retry 2
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_when_exhausted() {
        let policy = RetryPolicy::new(2, Backoff::None);
        let result: Result<(), String> =
            retry_with_backoff(policy, "test", |attempt| async move { Err(format!("e{attempt}")) })
                .await;
        assert_eq!(result, Err("e1".to_string()));
    }

    #[tokio::test]
    async fn predicate_stops_early() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Backoff::None);
        let result: Result<(), String> = retry_with_backoff_if(
            policy,
            "test",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
            |e| e != "fatal",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_never_zero_attempts() {
        assert_eq!(RetryPolicy::new(0, Backoff::None).attempts, 1);
        assert_eq!(RetryPolicy::once().attempts, 1);
    }
}

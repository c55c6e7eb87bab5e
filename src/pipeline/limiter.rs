//! Request-rate limiting for the image API.
//!
//! Image endpoints allow only a handful of requests per minute. Instead of
//! "fire a batch, sleep a minute" the pipeline asks a [`RequestLimiter`] for
//! a permit before every call. [`WindowLimiter`] hands out `quota` permits per
//! fixed window and makes later callers wait for the next window, which gives
//! the same batch-then-pause shape while staying testable: time comes from
//! the tokio clock, so `#[tokio::test(start_paused = true)]` runs it without
//! real sleeping.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

/// Grants permission to issue one upstream request.
#[async_trait]
pub trait RequestLimiter: Send + Sync {
    /// Wait until a request may be issued.
    async fn acquire(&self);
}

/// No limit at all.
pub struct Unlimited;

#[async_trait]
impl RequestLimiter for Unlimited {
    async fn acquire(&self) {}
}

struct WindowState {
    started: Option<Instant>,
    used: usize,
}

/// Fixed-window limiter: `quota` permits per `window`.
///
/// Waiters queue on a fair mutex, so permits are granted in request order.
pub struct WindowLimiter {
    quota: usize,
    window: Duration,
    state: Mutex<WindowState>,
}

impl WindowLimiter {
    pub fn new(quota: usize, window: Duration) -> Self {
        Self {
            quota: quota.max(1),
            window,
            state: Mutex::new(WindowState {
                started: None,
                used: 0,
            }),
        }
    }

    pub fn quota(&self) -> usize {
        self.quota
    }
}

#[async_trait]
impl RequestLimiter for WindowLimiter {
    async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        match state.started {
            Some(start) if now < start + self.window => {
                if state.used >= self.quota {
                    let next = start + self.window;
                    debug!(
                        "rate window exhausted ({} requests), waiting {:?}",
                        self.quota,
                        next - now
                    );
                    sleep_until(next).await;
                    state.started = Some(next);
                    state.used = 0;
                }
            }
            _ => {
                state.started = Some(now);
                state.used = 0;
            }
        }

        state.used += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn quota_within_window_is_immediate() {
        let limiter = WindowLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn excess_requests_wait_for_next_window() {
        let limiter = WindowLimiter::new(2, Duration::from_secs(61));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // 2 in window 0, 2 in window 1, 1 in window 2
        assert_eq!(start.elapsed(), Duration::from_secs(122));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_are_batched() {
        let limiter = Arc::new(WindowLimiter::new(2, Duration::from_secs(10)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let l = Arc::clone(&limiter);
                tokio::spawn(async move {
                    l.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::new();
        for h in handles {
            times.push(h.await.unwrap() - start);
        }
        times.sort();
        assert_eq!(
            times,
            vec![
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_secs(10),
                Duration::from_secs(10)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_window_resets() {
        let limiter = WindowLimiter::new(1, Duration::from_secs(5));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(6)).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}

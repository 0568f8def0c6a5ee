//! Sliding-window rate limiter
//!
//! Admits at most `max_requests` calls in any rolling `window`. The window
//! mutex is held across the sleep, so a waiting admitter keeps its place and
//! check-then-record cannot interleave with another caller.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Requests allowed per window when unconfigured.
pub const DEFAULT_MAX_REQUESTS: usize = 100;

/// Window length when unconfigured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A `max_requests` of zero is treated as one; configuration rejects it
    /// before it gets here.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a slot is free, then claim it.
    pub async fn admit(&self) {
        let started = Instant::now();
        let mut timestamps = self.timestamps.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = timestamps.front() {
                if now.duration_since(oldest) >= self.window {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }

            if timestamps.len() < self.max_requests {
                timestamps.push_back(now);
                break;
            }

            let Some(&oldest) = timestamps.front() else {
                continue;
            };
            let wait = (oldest + self.window).saturating_duration_since(now);
            debug!(
                wait_ms = wait.as_millis() as u64,
                in_window = timestamps.len(),
                "rate limit reached, waiting for a slot"
            );
            tokio::time::sleep(wait).await;
        }
        metrics::histogram!("rate_limiter_wait_seconds").record(started.elapsed().as_secs_f64());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn under_limit_admits_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.admit().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_request_waits_for_oldest_to_leave_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.admit().await;
        }
        tokio::time::advance(Duration::from_secs(4)).await;
        limiter.admit().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_admitters_never_exceed_window() {
        let limiter = Arc::new(RateLimiter::new(3, Duration::from_secs(10)));
        let admitted = Arc::new(std::sync::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                let admitted = admitted.clone();
                tokio::spawn(async move {
                    limiter.admit().await;
                    admitted.lock().unwrap().push(Instant::now());
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut times = admitted.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), 10);
        for pair in times.windows(4) {
            assert!(
                pair[3].duration_since(pair[0]) >= Duration::from_secs(10),
                "four admissions inside one window: {:?}",
                pair[3].duration_since(pair[0])
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_rather_than_resets() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();
        limiter.admit().await;
        tokio::time::advance(Duration::from_secs(6)).await;
        limiter.admit().await;

        // oldest leaves at t=10, not when a fixed bucket rolls over
        limiter.admit().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        limiter.admit().await;
        assert_eq!(start.elapsed(), Duration::from_secs(16));
    }

    #[test]
    fn zero_limit_is_clamped() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.max_requests(), 1);
    }

    #[test]
    fn defaults() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.max_requests(), 100);
        assert_eq!(limiter.window(), Duration::from_secs(60));
    }
}

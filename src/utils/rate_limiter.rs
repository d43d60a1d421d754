/// Sliding-window rate limiter for outbound REST calls
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{FeedError, Result};

/// Allows at most `max_calls` acquisitions in any trailing `period`.
///
/// There is no release step: a slot frees itself once its recorded instant
/// falls out of the window.
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, period: Duration) -> Result<Self> {
        if max_calls == 0 {
            return Err(FeedError::InvalidParameter("max_calls must be positive".to_string()));
        }
        if period.is_zero() {
            return Err(FeedError::InvalidParameter("period must be positive".to_string()));
        }

        Ok(RateLimiter {
            max_calls,
            period,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        })
    }

    /// Try to take a slot without waiting, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        self.evict_expired(&mut calls, now);

        if calls.len() < self.max_calls {
            calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// Wait until a slot is available, then take it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                self.evict_expired(&mut calls, now);

                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }

                match calls.front() {
                    Some(oldest) => (*oldest + self.period).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!("Rate limit reached ({} per {:?}), waiting {:?}", self.max_calls, self.period, wait);
            // Re-checked after the sleep since other callers may have raced us
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of calls still counted in the trailing window
    pub async fn in_flight(&self) -> usize {
        let mut calls = self.calls.lock().await;
        self.evict_expired(&mut calls, Instant::now());
        calls.len()
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn evict_expired(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= self.period {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rejects_non_positive_parameters() {
        assert!(RateLimiter::new(0, Duration::from_secs(1)).is_err());
        assert!(RateLimiter::new(1, Duration::ZERO).is_err());
        assert!(RateLimiter::new(1, Duration::from_millis(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_respects_quota() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1)).unwrap();

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
        assert_eq!(limiter.in_flight().await, 2);

        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_until_oldest_leaves_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1)).unwrap();
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_exceed_window() {
        let limiter = Arc::new(RateLimiter::new(3, Duration::from_secs(1)).unwrap());
        let mut handles = Vec::new();

        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(4) {
            assert!(pair[3].duration_since(pair[0]) >= Duration::from_secs(1));
        }
    }
}

//! Client-side rate limiting for model calls
//!
//! Sliding window per model id, so one busy model never starves another.
//! A refused request is reported to the caller as a recoverable failure and
//! goes through the normal retry backoff.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Sliding window rate limiter keyed by model
pub struct RateLimiter {
    /// model -> request timestamps inside the window
    requests: DashMap<String, Vec<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// `max_requests` per minute for every model
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Record a request if the model has budget left.
    ///
    /// Returns `Err(wait)` with the time until a slot frees up otherwise.
    pub fn check_and_record(&self, model: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let window = self.window;

        let mut entry = self.requests.entry(model.to_string()).or_default();
        let timestamps = entry.value_mut();

        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() >= self.max_requests {
            let wait = timestamps
                .first()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            warn!(
                model,
                requests = timestamps.len(),
                max = self.max_requests,
                "Client-side rate limit reached"
            );
            return Err(wait);
        }

        timestamps.push(now);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_allows_under_limit() {
        let limiter = RateLimiter::per_minute(3);
        assert!(limiter.check_and_record("gpt-4o").is_ok());
        assert!(limiter.check_and_record("gpt-4o").is_ok());
        assert!(limiter.check_and_record("gpt-4o").is_ok());
    }

    #[test]
    fn test_blocks_over_limit_with_wait_hint() {
        let limiter = RateLimiter::per_minute(2);
        limiter.check_and_record("gpt-4o").unwrap();
        limiter.check_and_record("gpt-4o").unwrap();
        let wait = limiter.check_and_record("gpt-4o").unwrap_err();
        assert!(wait > Duration::from_secs(50));
        assert!(wait <= Duration::from_secs(60));
    }

    #[test]
    fn test_models_are_independent() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.check_and_record("gpt-4o").is_ok());
        assert!(limiter.check_and_record("qwen/qwen2.5-vl-32b-instruct").is_ok());
        assert!(limiter.check_and_record("gpt-4o").is_err());
    }

    #[test]
    fn test_window_expiry() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100));
        assert!(limiter.check_and_record("m").is_ok());
        assert!(limiter.check_and_record("m").is_err());

        sleep(Duration::from_millis(150));

        assert!(limiter.check_and_record("m").is_ok());
    }
}

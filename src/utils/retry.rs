//! Retry policy shared by every network call of the fetcher.

use std::time::Duration;

use rand::Rng;

/// Fixed-throttle retry policy with random jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub throttle: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, throttle: Duration, jitter: Duration) -> Self {
        Self {
            max_retries,
            throttle,
            jitter,
        }
    }

    /// A policy that never sleeps, for tests and dry runs.
    pub const fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// 429 and every 5xx are worth another try.
    pub fn is_retryable(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn should_retry(&self, status: u16, attempt: u32) -> bool {
        Self::is_retryable(status) && attempt < self.max_attempts()
    }

    /// `throttle + random(0, jitter)`.
    pub fn delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        self.throttle + Duration::from_millis(extra)
    }

    pub async fn pause(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000), Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(RetryPolicy::is_retryable(429));
        assert!(RetryPolicy::is_retryable(503));
        assert!(!RetryPolicy::is_retryable(404));
        assert!(!RetryPolicy::is_retryable(200));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.should_retry(503, 3));
        assert!(!policy.should_retry(503, 4));
        assert!(!policy.should_retry(403, 1));
    }

    #[test]
    fn test_delay_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(50));
        for _ in 0..50 {
            let d = policy.delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
        assert_eq!(RetryPolicy::immediate(1).delay(), Duration::ZERO);
    }
}

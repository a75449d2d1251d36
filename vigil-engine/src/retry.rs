//! Bounded retry with exponential backoff.
//!
//! One policy type drives the pending-order sweep, in-place persistence
//! retries and downstream redelivery. The policy only answers questions
//! (is it due, is it exhausted, how long to wait); callers own the sleeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Retry policy: attempt cap, age horizon and backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Work older than this is abandoned without another attempt
    pub horizon: Duration,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Validated policy
    pub fn new(
        max_attempts: u32,
        horizon: Duration,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, EngineError> {
        if max_attempts == 0 {
            return Err(EngineError::InvalidRetryPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if base_delay > max_delay {
            return Err(EngineError::InvalidRetryPolicy(format!(
                "base_delay {:?} exceeds max_delay {:?}",
                base_delay, max_delay
            )));
        }
        Ok(Self {
            max_attempts,
            horizon,
            base_delay,
            max_delay,
        })
    }

    /// Small in-place policy for storage writes: 3 attempts, 200ms, 400ms
    pub fn persistence() -> Self {
        Self {
            max_attempts: 3,
            horizon: Duration::from_secs(10),
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }

    /// Delay to wait after `attempts` failed attempts
    ///
    /// 0 → zero, 1 → base, 2 → 2×base, 3 → 4×base … capped at `max_delay`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// No attempts left
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Created longer ago than the horizon
    pub fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(created_at);
        match chrono::Duration::from_std(self.horizon) {
            Ok(horizon) => age > horizon,
            Err(_) => false,
        }
    }

    /// Backoff since the last attempt has elapsed
    pub fn is_due(&self, attempts: u32, last_attempt_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_attempt_at else {
            return true;
        };
        let elapsed = now.signed_duration_since(last);
        match chrono::Duration::from_std(self.delay_for(attempts)) {
            Ok(delay) => elapsed >= delay,
            Err(_) => false,
        }
    }
}

impl Default for RetryPolicy {
    /// Pending-order defaults: 5 attempts within 1 hour, 30s doubling up to 10 minutes
    fn default() -> Self {
        Self {
            max_attempts: 5,
            horizon: Duration::from_secs(3600),
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(120));
        assert_eq!(policy.delay_for(6), Duration::from_secs(600));
        assert_eq!(policy.delay_for(40), Duration::from_secs(600));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
    }

    #[test]
    fn test_horizon() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        assert!(!policy.is_expired(now - ChronoDuration::minutes(59), now));
        assert!(policy.is_expired(now - ChronoDuration::minutes(61), now));
    }

    #[test]
    fn test_due_after_backoff() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        assert!(policy.is_due(0, None, now));
        assert!(!policy.is_due(1, Some(now - ChronoDuration::seconds(10)), now));
        assert!(policy.is_due(1, Some(now - ChronoDuration::seconds(30)), now));
        assert!(!policy.is_due(2, Some(now - ChronoDuration::seconds(45)), now));
    }

    #[test]
    fn test_validation() {
        assert!(RetryPolicy::new(0, Duration::from_secs(1), Duration::ZERO, Duration::ZERO).is_err());
        assert!(RetryPolicy::new(
            3,
            Duration::from_secs(60),
            Duration::from_secs(10),
            Duration::from_secs(1)
        )
        .is_err());
        assert_eq!(RetryPolicy::persistence().delay_for(2), Duration::from_millis(400));
    }
}

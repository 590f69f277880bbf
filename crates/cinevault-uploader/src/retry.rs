//! Per-part retry policy: exponential backoff with caps.
//!
//! Transience is decided by [`StorageError::is_transient`]; this module only
//! decides whether another attempt is allowed and how long to wait.

use std::time::Duration;

use cinevault_core::UploaderConfig;
use cinevault_storage::StorageError;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; the part has failed.
    GiveUp,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &UploaderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// Decide whether to retry after a failed attempt.
    ///
    /// `attempt` is 1-based and counts the attempt that just failed; the
    /// counter carries across pause/resume so a part never gets a fresh
    /// retry budget.
    pub fn decide(&self, attempt: u32, error: &StorageError) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::GiveUp;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        // base * 2^(attempt-1), capped.
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
        RetryDecision::RetryAfter(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> StorageError {
        StorageError::Timeout { op: "upload_part" }
    }

    fn fatal() -> StorageError {
        StorageError::Unauthorized("AccessDenied".into())
    }

    #[test]
    fn gives_up_on_fatal_errors() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(1, &fatal()), RetryDecision::GiveUp);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 20,
            ..Default::default()
        };
        let d1 = match policy.decide(1, &transient()) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        let d2 = match policy.decide(2, &transient()) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert!(d2 >= d1);

        let d_late = match policy.decide(15, &transient()) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert!(d_late <= policy.max_delay);
    }

    #[test]
    fn respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(matches!(
            policy.decide(1, &transient()),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            policy.decide(2, &transient()),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(policy.decide(3, &transient()), RetryDecision::GiveUp);
    }

    #[test]
    fn from_config_carries_limits() {
        let config = UploaderConfig {
            max_attempts: 7,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1_000,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(1));
    }
}

use std::time::Duration;

use jobstore_core::RetryConfig;
use jobstore_errors::JobStoreError;

/// 瞬时存储错误的重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            interval: Duration::from_millis(config.retry_interval_ms),
        }
    }

    /// 只有可重试的错误且还有剩余次数时才重试，`attempt` 从 1 开始
    pub fn should_retry(&self, error: &JobStoreError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_errors_never_retry() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&JobStoreError::conflict("x"), 1));
        assert!(!policy.should_retry(&JobStoreError::persistence("x"), 1));
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 2,
            retry_interval_ms: 10,
        });
        let busy = JobStoreError::Database(sqlx::Error::PoolTimedOut);
        assert!(policy.should_retry(&busy, 1));
        assert!(!policy.should_retry(&busy, 2));
        assert_eq!(policy.interval, Duration::from_millis(10));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 0,
            retry_interval_ms: 0,
        });
        assert_eq!(policy.max_attempts, 1);
    }
}

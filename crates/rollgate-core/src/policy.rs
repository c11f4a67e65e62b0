//! Retry policy for health checks.

use std::time::Duration;

use serde::Serialize;

use crate::error::{ConfigError, ConfigResult};

/// Bounded retry parameters for a health probe.
///
/// `max_attempts` is always at least 1; the constructor is the only way to
/// build a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthCheckPolicy {
    max_attempts: u32,
    retry_delay: Duration,
    per_attempt_timeout: Duration,
}

impl HealthCheckPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);
    pub const DEFAULT_PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(
        max_attempts: u32,
        retry_delay: Duration,
        per_attempt_timeout: Duration,
    ) -> ConfigResult<Self> {
        if max_attempts == 0 {
            return Err(ConfigError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if per_attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidPolicy(
                "per_attempt_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            retry_delay,
            per_attempt_timeout,
        })
    }

    /// Same delay and timeout, different attempt budget.
    pub fn with_max_attempts(self, max_attempts: u32) -> ConfigResult<Self> {
        Self::new(max_attempts, self.retry_delay, self.per_attempt_timeout)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        self.per_attempt_timeout
    }
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            per_attempt_timeout: Self::DEFAULT_PER_ATTEMPT_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let p = HealthCheckPolicy::default();
        assert_eq!(p.max_attempts(), 3);
        assert_eq!(p.retry_delay(), Duration::from_secs(10));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = HealthCheckPolicy::new(0, Duration::ZERO, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicy(_)));
    }

    #[test]
    fn zero_timeout_rejected() {
        assert!(HealthCheckPolicy::new(1, Duration::ZERO, Duration::ZERO).is_err());
    }

    #[test]
    fn with_max_attempts_keeps_timing() {
        let p = HealthCheckPolicy::new(3, Duration::from_secs(2), Duration::from_secs(1)).unwrap();
        let wider = p.with_max_attempts(5).unwrap();
        assert_eq!(wider.max_attempts(), 5);
        assert_eq!(wider.retry_delay(), Duration::from_secs(2));
        assert!(p.with_max_attempts(0).is_err());
    }
}

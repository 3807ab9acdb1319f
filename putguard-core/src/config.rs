//! Configuration types

use crate::{ConfigError, PutGuardResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default period after an invalidation during which naked puts are rejected.
pub const NAKED_PUT_INVALIDATION_WINDOW: Duration = Duration::from_secs(20);

/// Default age at which a pending put moves to the overage queue.
pub const PENDING_PUT_OVERAGE_PERIOD: Duration = Duration::from_secs(5);

/// Default age below which the sweeper stops scanning the recent queue.
pub const PENDING_PUT_RECENT_PERIOD: Duration = Duration::from_secs(2);

/// Default age after which an abandoned pending put is reclaimed.
pub const MAX_PENDING_PUT_DELAY: Duration = Duration::from_secs(2 * 60);

/// Default hot-path wait for a per-key lock.
pub const ACQUIRE_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Default wait when merging a registration into an existing key.
pub const REGISTRATION_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for a per-key lock during invalidation.
pub const INVALIDATION_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Tuning for a single put-from-load validator (one per cache region).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// How long after an invalidation naked puts are rejected.
    pub naked_put_invalidation_window: Duration,
    /// Age at which a registration moves to the overage sweep queue.
    pub pending_put_overage_period: Duration,
    /// Age below which the sweeper stops scanning the recent queue.
    pub pending_put_recent_period: Duration,
    /// Age at which an abandoned registration is forcibly reclaimed.
    pub max_pending_put_delay: Duration,
    /// Per-key lock wait on the acquire path and during forced reclamation.
    pub acquire_lock_timeout: Duration,
    /// Per-key lock wait when a registration joins an existing key.
    pub registration_lock_timeout: Duration,
    /// Per-key lock wait during key and region invalidation.
    pub invalidation_lock_timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            naked_put_invalidation_window: NAKED_PUT_INVALIDATION_WINDOW,
            pending_put_overage_period: PENDING_PUT_OVERAGE_PERIOD,
            pending_put_recent_period: PENDING_PUT_RECENT_PERIOD,
            max_pending_put_delay: MAX_PENDING_PUT_DELAY,
            acquire_lock_timeout: ACQUIRE_LOCK_TIMEOUT,
            registration_lock_timeout: REGISTRATION_LOCK_TIMEOUT,
            invalidation_lock_timeout: INVALIDATION_LOCK_TIMEOUT,
        }
    }
}

impl ValidatorConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the naked put invalidation window.
    pub fn with_naked_put_invalidation_window(mut self, window: Duration) -> Self {
        self.naked_put_invalidation_window = window;
        self
    }

    /// Set the overage period.
    pub fn with_pending_put_overage_period(mut self, period: Duration) -> Self {
        self.pending_put_overage_period = period;
        self
    }

    /// Set the recent period.
    pub fn with_pending_put_recent_period(mut self, period: Duration) -> Self {
        self.pending_put_recent_period = period;
        self
    }

    /// Set the maximum pending put delay.
    pub fn with_max_pending_put_delay(mut self, delay: Duration) -> Self {
        self.max_pending_put_delay = delay;
        self
    }

    /// Set the hot-path lock timeout.
    pub fn with_acquire_lock_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_lock_timeout = timeout;
        self
    }

    /// Set the registration lock timeout.
    pub fn with_registration_lock_timeout(mut self, timeout: Duration) -> Self {
        self.registration_lock_timeout = timeout;
        self
    }

    /// Set the invalidation lock timeout.
    pub fn with_invalidation_lock_timeout(mut self, timeout: Duration) -> Self {
        self.invalidation_lock_timeout = timeout;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - All durations are positive
    /// - recent period <= overage period <= max pending put delay
    pub fn validate(&self) -> PutGuardResult<()> {
        let durations = [
            ("naked_put_invalidation_window", self.naked_put_invalidation_window),
            ("pending_put_overage_period", self.pending_put_overage_period),
            ("pending_put_recent_period", self.pending_put_recent_period),
            ("max_pending_put_delay", self.max_pending_put_delay),
            ("acquire_lock_timeout", self.acquire_lock_timeout),
            ("registration_lock_timeout", self.registration_lock_timeout),
            ("invalidation_lock_timeout", self.invalidation_lock_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(invalid(field, value, format!("{} must be positive", field)));
            }
        }

        if self.pending_put_recent_period > self.pending_put_overage_period {
            return Err(invalid(
                "pending_put_recent_period",
                self.pending_put_recent_period,
                "pending_put_recent_period must not exceed pending_put_overage_period".to_string(),
            ));
        }

        if self.pending_put_overage_period > self.max_pending_put_delay {
            return Err(invalid(
                "pending_put_overage_period",
                self.pending_put_overage_period,
                "pending_put_overage_period must not exceed max_pending_put_delay".to_string(),
            ));
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables (all in milliseconds):
    /// - `PUTGUARD_NAKED_PUT_INVALIDATION_WINDOW_MS` (default: 20000)
    /// - `PUTGUARD_PENDING_PUT_OVERAGE_PERIOD_MS` (default: 5000)
    /// - `PUTGUARD_PENDING_PUT_RECENT_PERIOD_MS` (default: 2000)
    /// - `PUTGUARD_MAX_PENDING_PUT_DELAY_MS` (default: 120000)
    /// - `PUTGUARD_ACQUIRE_LOCK_TIMEOUT_MS` (default: 100)
    /// - `PUTGUARD_REGISTRATION_LOCK_TIMEOUT_MS` (default: 10000)
    /// - `PUTGUARD_INVALIDATION_LOCK_TIMEOUT_MS` (default: 60000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            naked_put_invalidation_window: env_millis(
                "PUTGUARD_NAKED_PUT_INVALIDATION_WINDOW_MS",
                defaults.naked_put_invalidation_window,
            ),
            pending_put_overage_period: env_millis(
                "PUTGUARD_PENDING_PUT_OVERAGE_PERIOD_MS",
                defaults.pending_put_overage_period,
            ),
            pending_put_recent_period: env_millis(
                "PUTGUARD_PENDING_PUT_RECENT_PERIOD_MS",
                defaults.pending_put_recent_period,
            ),
            max_pending_put_delay: env_millis(
                "PUTGUARD_MAX_PENDING_PUT_DELAY_MS",
                defaults.max_pending_put_delay,
            ),
            acquire_lock_timeout: env_millis(
                "PUTGUARD_ACQUIRE_LOCK_TIMEOUT_MS",
                defaults.acquire_lock_timeout,
            ),
            registration_lock_timeout: env_millis(
                "PUTGUARD_REGISTRATION_LOCK_TIMEOUT_MS",
                defaults.registration_lock_timeout,
            ),
            invalidation_lock_timeout: env_millis(
                "PUTGUARD_INVALIDATION_LOCK_TIMEOUT_MS",
                defaults.invalidation_lock_timeout,
            ),
        }
    }
}

/// Convert a duration to whole clock milliseconds, saturating.
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn invalid(field: &str, value: Duration, reason: String) -> crate::PutGuardError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: format!("{:?}", value),
        reason,
    }
    .into()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PutGuardError;

    #[test]
    fn test_default_config_is_valid() {
        let config = ValidatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.naked_put_invalidation_window, Duration::from_secs(20));
        assert_eq!(config.pending_put_overage_period, Duration::from_secs(5));
        assert_eq!(config.pending_put_recent_period, Duration::from_secs(2));
        assert_eq!(config.max_pending_put_delay, Duration::from_secs(120));
        assert_eq!(config.acquire_lock_timeout, Duration::from_millis(100));
        assert_eq!(config.invalidation_lock_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builder_setters() {
        let config = ValidatorConfig::new()
            .with_naked_put_invalidation_window(Duration::from_millis(500))
            .with_pending_put_recent_period(Duration::from_millis(10))
            .with_pending_put_overage_period(Duration::from_millis(20))
            .with_max_pending_put_delay(Duration::from_millis(30))
            .with_acquire_lock_timeout(Duration::from_millis(5))
            .with_registration_lock_timeout(Duration::from_millis(6))
            .with_invalidation_lock_timeout(Duration::from_millis(7));

        assert_eq!(config.naked_put_invalidation_window, Duration::from_millis(500));
        assert_eq!(config.pending_put_recent_period, Duration::from_millis(10));
        assert_eq!(config.pending_put_overage_period, Duration::from_millis(20));
        assert_eq!(config.max_pending_put_delay, Duration::from_millis(30));
        assert_eq!(config.acquire_lock_timeout, Duration::from_millis(5));
        assert_eq!(config.registration_lock_timeout, Duration::from_millis(6));
        assert_eq!(config.invalidation_lock_timeout, Duration::from_millis(7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_duration_rejected() {
        let config = ValidatorConfig::new().with_acquire_lock_timeout(Duration::ZERO);
        match config.validate() {
            Err(PutGuardError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "acquire_lock_timeout");
            }
            other => panic!("expected invalid acquire_lock_timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_sweep_periods_must_be_ordered() {
        let config = ValidatorConfig::new()
            .with_pending_put_recent_period(Duration::from_secs(10))
            .with_pending_put_overage_period(Duration::from_secs(5));
        assert!(config.validate().is_err());

        let config = ValidatorConfig::new().with_max_pending_put_delay(Duration::from_secs(1));
        match config.validate() {
            Err(PutGuardError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "pending_put_overage_period");
            }
            other => panic!("expected ordering violation, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "naked_put_invalidation_window": { "secs": 1, "nanos": 0 } }"#;
        let config: ValidatorConfig = serde_json::from_str(json).expect("config should parse");
        assert_eq!(config.naked_put_invalidation_window, Duration::from_secs(1));
        assert_eq!(config.max_pending_put_delay, MAX_PENDING_PUT_DELAY);
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_millis(Duration::MAX), i64::MAX);
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn prop_validate_accepts_exactly_ordered_periods(
                recent in 0u64..10_000,
                overage in 0u64..10_000,
                max_delay in 0u64..10_000,
            ) {
                let config = ValidatorConfig::new()
                    .with_pending_put_recent_period(Duration::from_millis(recent))
                    .with_pending_put_overage_period(Duration::from_millis(overage))
                    .with_max_pending_put_delay(Duration::from_millis(max_delay));

                let expected = recent > 0 && recent <= overage && overage <= max_delay;
                prop_assert_eq!(config.validate().is_ok(), expected);
            }
        }
    }
}

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::config::helpers::{
    parse_bool_env, parse_duration_ms_env, parse_string_env, parse_u64_env, parse_usize_env,
    require_positive,
};
use crate::error::{ConfigError, MonitorError};
use crate::retry::RetryPolicy;
use crate::settings::Settings;

/// Knobs of one monitoring run. Tests pass zero delays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub concurrent_checks: usize,
    pub batch_delay: Duration,
    /// How far back tracking updates are requested and kept.
    pub lookback: Duration,
    pub max_retries_per_item: usize,
    pub retry_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrent_checks: 5,
            batch_delay: Duration::from_secs(2),
            lookback: Duration::from_secs(24 * 60 * 60),
            max_retries_per_item: 2,
            retry_delay: Duration::from_secs(3),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.batch_size == 0 {
            return Err(MonitorError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.concurrent_checks == 0 {
            return Err(MonitorError::InvalidConfig(
                "concurrent_checks must be greater than zero".to_string(),
            ));
        }
        if chrono::Duration::from_std(self.lookback).is_err() {
            return Err(MonitorError::InvalidConfig(format!(
                "lookback {:?} is out of range",
                self.lookback
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries_per_item, self.retry_delay)
    }
}

/// Scheduled monitoring and stale-onboarding sweep.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// Six-field cron expression, UTC.
    pub schedule: String,
    pub batch: BatchConfig,
    /// ONBOARDING cases untouched for longer than this are re-driven by the sweep.
    pub stale_onboarding_after: Duration,
}

pub(crate) fn validate_schedule(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    cron::Schedule::from_str(trimmed).map_err(|e| ConfigError::InvalidValue {
        key: "MONITORING_SCHEDULE".to_string(),
        message: format!("invalid cron expression '{trimmed}': {e}"),
    })?;
    Ok(trimmed.to_string())
}

impl MonitoringConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let m = &settings.monitoring;
        let lookback_hours = parse_u64_env("MONITORING_LOOKBACK_HOURS", m.lookback_hours)?;
        if lookback_hours == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MONITORING_LOOKBACK_HOURS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        let stale_minutes =
            parse_u64_env("MONITORING_STALE_ONBOARDING_MINUTES", m.stale_onboarding_minutes)?;

        Ok(Self {
            enabled: parse_bool_env("MONITORING_ENABLED", m.enabled)?,
            schedule: {
                let raw = parse_string_env("MONITORING_SCHEDULE", m.schedule.clone())?;
                validate_schedule(&raw)?
            },
            batch: BatchConfig {
                batch_size: require_positive(
                    "MONITORING_BATCH_SIZE",
                    parse_usize_env("MONITORING_BATCH_SIZE", m.batch_size)?,
                )?,
                concurrent_checks: require_positive(
                    "MONITORING_CONCURRENT_CHECKS",
                    parse_usize_env("MONITORING_CONCURRENT_CHECKS", m.concurrent_checks)?,
                )?,
                batch_delay: parse_duration_ms_env("MONITORING_BATCH_DELAY_MS", m.batch_delay_ms)?,
                lookback: Duration::from_secs(lookback_hours.saturating_mul(3600)),
                max_retries_per_item: parse_usize_env(
                    "MONITORING_MAX_RETRIES_PER_ITEM",
                    m.max_retries_per_item,
                )?,
                retry_delay: parse_duration_ms_env("MONITORING_RETRY_DELAY_MS", m.retry_delay_ms)?,
            },
            stale_onboarding_after: Duration::from_secs(stale_minutes.saturating_mul(60)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitoring_resolve_uses_documented_defaults() {
        let config = MonitoringConfig::resolve(&Settings::default()).expect("monitoring config");

        assert!(config.enabled);
        assert_eq!(config.schedule, "0 0 6 * * *");
        assert_eq!(config.batch, BatchConfig::default());
        assert_eq!(config.stale_onboarding_after, Duration::from_secs(30 * 60));
    }

    #[test]
    fn monitoring_resolve_rejects_zero_batch_size() {
        let mut settings = Settings::default();
        settings.monitoring.batch_size = 0;

        let err = MonitoringConfig::resolve(&settings).expect_err("zero batch");
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MONITORING_BATCH_SIZE")
        );
    }

    #[test]
    fn monitoring_resolve_rejects_bad_cron() {
        let mut settings = Settings::default();
        settings.monitoring.schedule = "every morning".to_string();

        assert!(MonitoringConfig::resolve(&settings).is_err());
    }

    #[test]
    fn validate_schedule_trims_whitespace() {
        assert_eq!(
            validate_schedule("  0 30 5 * * *  ").expect("valid"),
            "0 30 5 * * *"
        );
    }

    #[test]
    fn batch_config_validation() {
        assert!(BatchConfig::default().validate().is_ok());
        let zero_pool = BatchConfig {
            concurrent_checks: 0,
            ..BatchConfig::default()
        };
        assert!(matches!(
            zero_pool.validate(),
            Err(MonitorError::InvalidConfig(_))
        ));
        assert_eq!(BatchConfig::default().retry_policy().max_attempts(), 3);
    }
}

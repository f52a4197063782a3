//! Environment override helpers used by the `resolve` functions.
//!
//! Empty (whitespace-only) variables count as unset.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

pub(crate) fn parse_bool_value(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

pub(crate) fn parse_u64_value(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a non-negative integer, got '{}': {}", raw.trim(), e),
        })
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        Some(raw) => parse_bool_value(key, &raw),
        None => Ok(default),
    }
}

pub(crate) fn parse_string_env(key: &str, default: String) -> Result<String, ConfigError> {
    Ok(optional_env(key)?
        .map(|value| value.trim().to_string())
        .unwrap_or(default))
}

pub(crate) fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_env(key)? {
        Some(raw) => parse_u64_value(key, &raw),
        None => Ok(default),
    }
}

pub(crate) fn parse_usize_env(key: &str, default: u64) -> Result<usize, ConfigError> {
    let value = parse_u64_env(key, default)?;
    usize::try_from(value).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{value} does not fit in usize"),
    })
}

/// Milliseconds from the environment, falling back to `default_ms`.
pub(crate) fn parse_duration_ms_env(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    parse_u64_env(key, default_ms).map(Duration::from_millis)
}

/// Secret from the environment, falling back to the settings file value.
pub(crate) fn optional_secret_env(
    key: &str,
    fallback: Option<&str>,
) -> Result<Option<SecretString>, ConfigError> {
    let value = optional_env(key)?.or_else(|| {
        fallback
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    });
    Ok(value.map(|s| SecretString::from(s.trim().to_string())))
}

/// Reject zero for settings that size loops or pools.
pub(crate) fn require_positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

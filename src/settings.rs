//! File-backed settings.
//!
//! Every field has a default, so an absent or partial `jurisync.toml` is
//! valid. Environment overrides are applied later by `Config::resolve`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "jurisync.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub provider: ProviderSettings,
    pub webhook: WebhookSettings,
    pub server: ServerSettings,
    pub onboarding: OnboardingSettings,
    pub monitoring: MonitoringSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `libsql` or `memory`.
    pub backend: String,
    pub libsql_path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: "libsql".to_string(),
            libsql_path: "data/jurisync.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub base_url: String,
    /// Prefer `PROVIDER_API_TOKEN` over storing the token in the file.
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
    pub max_retries: u64,
    pub retry_delay_ms: u64,
    pub poll_attempts: u64,
    pub poll_delay_ms: u64,
    pub summary_wait_ms: u64,
    pub max_movement_pages: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: "escavador".to_string(),
            base_url: "https://api.escavador.com/".to_string(),
            api_token: None,
            request_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 2_000,
            poll_attempts: 10,
            poll_delay_ms: 3_000,
            summary_wait_ms: 5_000,
            max_movement_pages: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub secret: Option<String>,
    pub ack_timeout_ms: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            secret: None,
            ack_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingSettings {
    pub include_attachments: bool,
    pub attachment_limit: Option<u64>,
    pub use_certificate: bool,
    pub monitoring_frequency: String,
    pub retry_credit_cost: i64,
    pub credit_category: String,
}

impl Default for OnboardingSettings {
    fn default() -> Self {
        Self {
            include_attachments: true,
            attachment_limit: None,
            use_certificate: false,
            monitoring_frequency: "daily".to_string(),
            retry_credit_cost: 1,
            credit_category: "process_onboarding".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub enabled: bool,
    /// Six-field cron expression, evaluated in UTC.
    pub schedule: String,
    pub batch_size: u64,
    pub concurrent_checks: u64,
    pub batch_delay_ms: u64,
    pub lookback_hours: u64,
    pub max_retries_per_item: u64,
    pub retry_delay_ms: u64,
    pub stale_onboarding_minutes: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 0 6 * * *".to_string(),
            batch_size: 50,
            concurrent_checks: 5,
            batch_delay_ms: 2_000,
            lookback_hours: 24,
            max_retries_per_item: 2,
            retry_delay_ms: 3_000,
            stale_onboarding_minutes: 30,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Parse(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Settings path from `JURISYNC_CONFIG`, falling back to `jurisync.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var_os("JURISYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }
}

//! Runtime configuration.
//!
//! `Settings` (file, defaults) is resolved into `Config` with environment
//! overrides. Every knob that paces provider traffic lives here and is passed
//! to constructors explicitly.

pub(crate) mod helpers;
mod monitoring;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{
    optional_env, optional_secret_env, parse_bool_env, parse_duration_ms_env, parse_string_env,
    parse_u64_env, parse_usize_env, require_positive,
};
use crate::error::ConfigError;
use crate::provider::MonitoringFrequency;
use crate::retry::RetryPolicy;
use crate::settings::Settings;

pub use monitoring::{BatchConfig, MonitoringConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Memory,
    LibSql,
}

impl DatabaseBackend {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "libsql" | "sqlite" => Ok(Self::LibSql),
            other => Err(ConfigError::InvalidValue {
                key: "DATABASE_BACKEND".to_string(),
                message: format!("unsupported backend '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::LibSql => "libsql",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub libsql_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_token: Option<SecretString>,
    pub request_timeout: Duration,
    /// Transient-error retries per provider call.
    pub max_retries: usize,
    pub retry_delay: Duration,
    /// Polls while the provider answers "still collecting".
    pub poll_attempts: usize,
    pub poll_delay: Duration,
    /// Fixed wait between requesting and fetching the AI summary.
    pub summary_wait: Duration,
    pub max_movement_pages: usize,
}

impl ProviderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }

    /// Zero delays and a small budget, for tests and local fakes.
    pub fn immediate(base_url: impl Into<String>) -> Self {
        Self {
            name: "test".to_string(),
            base_url: base_url.into(),
            api_token: None,
            request_timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay: Duration::ZERO,
            poll_attempts: 3,
            poll_delay: Duration::ZERO,
            summary_wait: Duration::ZERO,
            max_movement_pages: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Shared secret; `None` runs in degraded mode (accept and warn).
    pub secret: Option<SecretString>,
    /// How long a webhook request waits for enrichment before acking as deferred.
    pub ack_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                key: "HTTP_HOST".to_string(),
                message: format!("invalid listen address {}:{}: {}", self.host, self.port, e),
            })
    }
}

#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    pub include_attachments: bool,
    pub attachment_limit: Option<usize>,
    pub use_certificate: bool,
    pub monitoring_frequency: MonitoringFrequency,
    /// Credits charged per retry; zero disables the credit gate.
    pub retry_credit_cost: i64,
    pub credit_category: String,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            include_attachments: true,
            attachment_limit: None,
            use_certificate: false,
            monitoring_frequency: MonitoringFrequency::Daily,
            retry_credit_cost: 1,
            credit_category: "process_onboarding".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub webhook: WebhookConfig,
    pub server: ServerConfig,
    pub onboarding: OnboardingConfig,
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Load `.env`, the settings file, and environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let settings = Settings::load(&Settings::default_path())?;
        Self::resolve(&settings)
    }

    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            database: resolve_database(settings)?,
            provider: resolve_provider(settings)?,
            webhook: WebhookConfig {
                secret: optional_secret_env("WEBHOOK_SECRET", settings.webhook.secret.as_deref())?,
                ack_timeout: parse_duration_ms_env(
                    "WEBHOOK_ACK_TIMEOUT_MS",
                    settings.webhook.ack_timeout_ms,
                )?,
            },
            server: ServerConfig {
                host: parse_string_env("HTTP_HOST", settings.server.host.clone())?,
                port: {
                    let port = parse_u64_env("HTTP_PORT", u64::from(settings.server.port))?;
                    u16::try_from(port).map_err(|_| ConfigError::InvalidValue {
                        key: "HTTP_PORT".to_string(),
                        message: format!("{port} is not a valid port"),
                    })?
                },
            },
            onboarding: resolve_onboarding(settings)?,
            monitoring: MonitoringConfig::resolve(settings)?,
        })
    }
}

fn resolve_database(settings: &Settings) -> Result<DatabaseConfig, ConfigError> {
    let backend_raw = parse_string_env("DATABASE_BACKEND", settings.database.backend.clone())?;
    let path = parse_string_env("LIBSQL_PATH", settings.database.libsql_path.clone())?;
    if path.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "LIBSQL_PATH".to_string(),
            message: "database path must not be empty".to_string(),
        });
    }
    Ok(DatabaseConfig {
        backend: DatabaseBackend::from_str(&backend_raw)?,
        libsql_path: PathBuf::from(path),
    })
}

fn resolve_provider(settings: &Settings) -> Result<ProviderConfig, ConfigError> {
    let p = &settings.provider;
    let base_url = parse_string_env("PROVIDER_BASE_URL", p.base_url.clone())?;
    url::Url::parse(&base_url).map_err(|e| ConfigError::InvalidValue {
        key: "PROVIDER_BASE_URL".to_string(),
        message: format!("invalid url '{base_url}': {e}"),
    })?;

    Ok(ProviderConfig {
        name: parse_string_env("PROVIDER_NAME", p.name.clone())?,
        base_url,
        api_token: optional_secret_env("PROVIDER_API_TOKEN", p.api_token.as_deref())?,
        request_timeout: parse_duration_ms_env(
            "PROVIDER_REQUEST_TIMEOUT_MS",
            p.request_timeout_ms,
        )?,
        max_retries: parse_usize_env("PROVIDER_MAX_RETRIES", p.max_retries)?,
        retry_delay: parse_duration_ms_env("PROVIDER_RETRY_DELAY_MS", p.retry_delay_ms)?,
        poll_attempts: require_positive(
            "PROVIDER_POLL_ATTEMPTS",
            parse_usize_env("PROVIDER_POLL_ATTEMPTS", p.poll_attempts)?,
        )?,
        poll_delay: parse_duration_ms_env("PROVIDER_POLL_DELAY_MS", p.poll_delay_ms)?,
        summary_wait: parse_duration_ms_env("PROVIDER_SUMMARY_WAIT_MS", p.summary_wait_ms)?,
        max_movement_pages: require_positive(
            "PROVIDER_MAX_MOVEMENT_PAGES",
            parse_usize_env("PROVIDER_MAX_MOVEMENT_PAGES", p.max_movement_pages)?,
        )?,
    })
}

fn resolve_onboarding(settings: &Settings) -> Result<OnboardingConfig, ConfigError> {
    let o = &settings.onboarding;
    let frequency_raw =
        parse_string_env("MONITORING_FREQUENCY", o.monitoring_frequency.clone())?;
    let monitoring_frequency =
        MonitoringFrequency::from_db_value(&frequency_raw.to_ascii_lowercase()).ok_or_else(
            || ConfigError::InvalidValue {
                key: "MONITORING_FREQUENCY".to_string(),
                message: format!("expected 'daily' or 'weekly', got '{frequency_raw}'"),
            },
        )?;

    let attachment_limit = match optional_env("ONBOARDING_ATTACHMENT_LIMIT")? {
        Some(raw) => Some(helpers::parse_u64_value("ONBOARDING_ATTACHMENT_LIMIT", &raw)?),
        None => o.attachment_limit,
    }
    .map(|limit| {
        usize::try_from(limit).map_err(|_| ConfigError::InvalidValue {
            key: "ONBOARDING_ATTACHMENT_LIMIT".to_string(),
            message: format!("{limit} does not fit in usize"),
        })
    })
    .transpose()?;

    let retry_credit_cost = match optional_env("RETRY_CREDIT_COST")? {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "RETRY_CREDIT_COST".to_string(),
                message: e.to_string(),
            })?,
        None => o.retry_credit_cost,
    };
    if retry_credit_cost < 0 {
        return Err(ConfigError::InvalidValue {
            key: "RETRY_CREDIT_COST".to_string(),
            message: "must not be negative".to_string(),
        });
    }

    Ok(OnboardingConfig {
        include_attachments: parse_bool_env(
            "ONBOARDING_INCLUDE_ATTACHMENTS",
            o.include_attachments,
        )?,
        attachment_limit,
        use_certificate: parse_bool_env("ONBOARDING_USE_CERTIFICATE", o.use_certificate)?,
        monitoring_frequency,
        retry_credit_cost,
        credit_category: parse_string_env("ONBOARDING_CREDIT_CATEGORY", o.credit_category.clone())?,
    })
}

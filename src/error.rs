//! Error types shared across the crate.

use uuid::Uuid;

use crate::lifecycle::CaseStatus;

/// Configuration resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("missing required setting {key}")]
    Missing { key: String },

    #[error("failed to parse settings file: {0}")]
    Parse(String),
}

/// Persistence failures, backend agnostic.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[cfg(feature = "libsql")]
    #[error("libsql error: {0}")]
    Libsql(#[from] libsql::Error),
}

/// Failures reported by the external legal-records provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Timeouts, 5xx, rate limiting, connection resets. Safe to retry.
    #[error("provider temporarily unavailable: {reason}")]
    Transient { reason: String },

    /// The provider does not know the process.
    #[error("process {cnj} not found at provider")]
    NotFound { cnj: String },

    /// Permanent refusal (invalid process, sealed without certificate, 4xx).
    #[error("provider rejected request: {reason}")]
    Rejected { reason: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Rejected status transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("case is not eligible for retry: {reason}")]
    InvalidRetryState { reason: String },

    #[error("transition from {} to {} is not allowed", from.as_str(), to.as_str())]
    NotAllowed { from: CaseStatus, to: CaseStatus },
}

#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("invalid CNJ '{input}': {reason}")]
    InvalidCnj { input: String, reason: String },

    #[error("case {0} not found")]
    CaseNotFound(Uuid),

    #[error("process {cnj} not found at provider")]
    ProcessNotFound { cnj: String },

    #[error("provider error: {0}")]
    Provider(ProviderError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<ProviderError> for OnboardingError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound { cnj } => Self::ProcessNotFound { cnj },
            other => Self::Provider(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook authentication failed")]
    Unauthorized,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("webhook reconciliation failed: {0}")]
    Reconciliation(OnboardingError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("failed to load monitoring subscriptions: {0}")]
    LoadSubscriptions(DatabaseError),

    #[error("invalid monitoring configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid schedule '{expression}': {reason}")]
    Schedule { expression: String, reason: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    #[error("credit service unavailable: {0}")]
    Unavailable(String),

    #[error("insufficient credits: balance {balance}, required {required}")]
    Insufficient { balance: i64, required: i64 },
}

/// Failures of the retry entry point. Every variant maps to a user-facing reason.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("case {0} not found")]
    CaseNotFound(Uuid),

    #[error(transparent)]
    NotEligible(TransitionError),

    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("onboarding failed: {0}")]
    Onboarding(OnboardingError),

    #[error(transparent)]
    Credits(CreditError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl RetryError {
    pub fn user_message(&self) -> String {
        match self {
            Self::CaseNotFound(_) => "Case not found".to_string(),
            Self::NotEligible(err) => format!("Case is not eligible to retry: {err}"),
            Self::InsufficientCredits { balance, required } => format!(
                "Insufficient credits to retry (balance {balance}, required {required})"
            ),
            Self::Onboarding(OnboardingError::ProcessNotFound { cnj }) => {
                format!("Process {cnj} was not found by the provider")
            }
            Self::Credits(_) => "Credit service unavailable, try again later".to_string(),
            Self::Onboarding(_) | Self::Database(_) => {
                "Provider error, try again later".to_string()
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to start HTTP server: {reason}")]
    StartupFailed { reason: String },
}

//! Case lifecycle: states, the transition table and its guards.
//!
//! Nothing here performs I/O. Stores apply the resulting transitions with a
//! compare-and-set on the current status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Onboarding status of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Unassigned,
    Onboarding,
    Active,
    Error,
    Closed,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unassigned => "UNASSIGNED",
            Self::Onboarding => "ONBOARDING",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
            Self::Closed => "CLOSED",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "UNASSIGNED" => Some(Self::Unassigned),
            "ONBOARDING" => Some(Self::Onboarding),
            "ACTIVE" => Some(Self::Active),
            "ERROR" => Some(Self::Error),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Free-form case metadata. Known keys are typed; anything else is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseMetadata {
    #[serde(default = "default_can_retry")]
    pub can_retry: bool,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_can_retry() -> bool {
    true
}

impl Default for CaseMetadata {
    fn default() -> Self {
        Self {
            can_retry: true,
            attempts: 0,
            last_error: None,
            last_attempt_at: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl CaseMetadata {
    /// Metadata for a fresh onboarding attempt: previous error cleared, counter bumped.
    pub fn for_new_attempt(&self, now: DateTime<Utc>) -> Self {
        Self {
            can_retry: self.can_retry,
            attempts: self.attempts.saturating_add(1),
            last_error: None,
            last_attempt_at: Some(now),
            extra: self.extra.clone(),
        }
    }

    pub fn with_error(&self, reason: impl Into<String>) -> Self {
        Self {
            last_error: Some(reason.into()),
            ..self.clone()
        }
    }
}

/// Target states reachable from `from`.
pub fn allowed_targets(from: CaseStatus) -> &'static [CaseStatus] {
    use CaseStatus::*;
    match from {
        Unassigned => &[Onboarding, Closed],
        Onboarding => &[Active, Error],
        Active => &[Closed],
        Error => &[Onboarding, Closed],
        Closed => &[],
    }
}

/// Validate a transition against the table and its guard predicates.
pub fn check_transition(
    from: CaseStatus,
    to: CaseStatus,
    detected_cnj: Option<&str>,
    metadata: &CaseMetadata,
) -> Result<(), TransitionError> {
    if !allowed_targets(from).contains(&to) {
        return Err(TransitionError::NotAllowed { from, to });
    }

    if to == CaseStatus::Onboarding {
        let has_cnj = detected_cnj.is_some_and(|cnj| !cnj.trim().is_empty());
        if !has_cnj {
            return Err(TransitionError::InvalidRetryState {
                reason: "no CNJ detected for this case".to_string(),
            });
        }
        if !metadata.can_retry {
            return Err(TransitionError::InvalidRetryState {
                reason: "retry is disabled for this case".to_string(),
            });
        }
    }

    Ok(())
}

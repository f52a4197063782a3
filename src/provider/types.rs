//! Provider-neutral data exchanged with the legal-records gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cnj::Cnj;

/// One docket entry of a process timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    /// Provider movement id, used for deduplication.
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
}

/// AI-generated process summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub content: String,
    pub generated_at: DateTime<Utc>,
}

/// Core process data as returned by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub cnj: Cnj,
    pub payload: serde_json::Value,
}

/// Result of a process lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessLookup {
    Found(ProcessSnapshot),
    /// The provider is still collecting data from the courts.
    Pending,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementPage {
    pub items: Vec<Movement>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Ask the provider to re-collect from the courts instead of serving cached data.
    pub force_update: bool,
    /// Use the workspace's digital certificate for sealed processes.
    pub use_certificate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentOptions {
    pub use_certificate: bool,
    pub limit: Option<usize>,
}

/// Acknowledgment of an asynchronous update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringFrequency {
    #[default]
    Daily,
    Weekly,
}

impl MonitoringFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }
}

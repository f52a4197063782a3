//! Response bodies for the HTTP API.

use serde::Serialize;
use uuid::Uuid;

use crate::onboarding::{OnboardingResult, RetryResponse};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Body of a successful retry. Synchronous retries return the onboarding
/// counts; asynchronous ones only confirm the case is waiting for the provider.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RetryBody {
    Completed(OnboardingResult),
    Started { status: &'static str, case_id: Uuid },
}

impl From<RetryResponse> for RetryBody {
    fn from(response: RetryResponse) -> Self {
        match response {
            RetryResponse::Completed(result) => Self::Completed(result),
            RetryResponse::Started { case_id } => Self::Started {
                status: "retry_started",
                case_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_retry_serializes_with_marker_status() {
        let case_id = Uuid::new_v4();
        let body = serde_json::to_value(RetryBody::from(RetryResponse::Started { case_id }))
            .expect("serialize");

        assert_eq!(body["status"], "retry_started");
        assert_eq!(body["case_id"], case_id.to_string());
    }
}

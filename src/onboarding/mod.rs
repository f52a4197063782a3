//! Onboarding orchestrator.
//!
//! Drives one CNJ from request to a persisted Processo and, when a target
//! case is given, moves that case ONBOARDING → ACTIVE or ONBOARDING → ERROR.
//! Synchronous mode (fetch, poll while the provider is still collecting,
//! enrich) is authoritative; asynchronous mode only registers an update
//! request and leaves completion to the webhook reconciler.

pub mod enrichment;
pub mod retry;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cnj::Cnj;
use crate::config::{OnboardingConfig, ProviderConfig};
use crate::db::{CaseRecord, CaseStatusUpdate, Database};
use crate::error::{OnboardingError, ProviderError, TransitionError};
use crate::lifecycle::{CaseStatus, check_transition};
use crate::provider::{FetchOptions, ProcessLookup, ProcessSnapshot, ProviderGateway};
use crate::retry::{Poll, poll_until_ready, retry_transient};

pub use enrichment::{EnrichmentOptions, EnrichmentOutcome, EnrichmentStep, EnrichmentWarning, Enricher};
pub use retry::{RetryResponse, RetryService};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingMode {
    /// Fetch and enrich inline, polling while the provider is collecting.
    #[default]
    Sync,
    /// Register an update request; the webhook completes the case.
    Async,
}

#[derive(Debug, Clone)]
pub struct OnboardingRequest {
    pub cnj: String,
    pub workspace_id: String,
    pub target_case_id: Option<Uuid>,
    pub force_update: bool,
    pub include_attachments: bool,
    pub use_certificate: bool,
    pub mode: OnboardingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    /// Processo persisted; the target case (if any) was resolved.
    Completed,
    /// Waiting for the provider's webhook.
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnboardingResult {
    pub cnj: String,
    pub status: OnboardingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<CaseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processo_id: Option<Uuid>,
    pub movements: usize,
    pub attachments: usize,
    pub summary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring_subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_request_id: Option<String>,
    pub warnings: Vec<EnrichmentWarning>,
}

impl OnboardingResult {
    fn pending(cnj: &Cnj, case: Option<CaseRecord>, update_request_id: String) -> Self {
        Self {
            cnj: cnj.to_string(),
            status: OnboardingStatus::Pending,
            case,
            processo_id: None,
            movements: 0,
            attachments: 0,
            summary: false,
            monitoring_subscription_id: None,
            update_request_id: Some(update_request_id),
            warnings: Vec::new(),
        }
    }
}

/// Move a case ONBOARDING → ACTIVE and link its Processo.
///
/// The workspace process count is incremented only when this call won the
/// compare-and-set; `Ok(None)` means another writer resolved the case first.
pub async fn complete_onboarding(
    db: &dyn Database,
    case: &CaseRecord,
    processo_id: Uuid,
) -> Result<Option<CaseRecord>, OnboardingError> {
    check_transition(
        CaseStatus::Onboarding,
        CaseStatus::Active,
        case.detected_cnj.as_deref(),
        &case.metadata,
    )?;
    let mut metadata = case.metadata.clone();
    metadata.last_error = None;

    let updated = db
        .compare_and_set_case_status(
            case.id,
            &CaseStatusUpdate {
                from: CaseStatus::Onboarding,
                to: CaseStatus::Active,
                metadata,
                processo_id: Some(processo_id),
                detected_cnj: None,
            },
        )
        .await?;

    match updated {
        Some(active) => {
            let count = db.increment_process_count(&active.workspace_id).await?;
            tracing::info!(
                case_id = %active.id,
                workspace_id = %active.workspace_id,
                processo_id = %processo_id,
                process_count = count,
                "Case onboarding completed"
            );
            Ok(Some(active))
        }
        None => {
            tracing::info!(case_id = %case.id, "Case already left ONBOARDING; completion skipped");
            Ok(None)
        }
    }
}

/// Move a case ONBOARDING → ERROR, recording `reason`.
pub async fn fail_onboarding(
    db: &dyn Database,
    case: &CaseRecord,
    reason: &str,
) -> Result<Option<CaseRecord>, OnboardingError> {
    let updated = db
        .compare_and_set_case_status(
            case.id,
            &CaseStatusUpdate {
                from: CaseStatus::Onboarding,
                to: CaseStatus::Error,
                metadata: case.metadata.with_error(reason),
                processo_id: None,
                detected_cnj: None,
            },
        )
        .await?;

    match &updated {
        Some(_) => tracing::warn!(case_id = %case.id, reason, "Case onboarding failed"),
        None => {
            tracing::info!(case_id = %case.id, "Case already left ONBOARDING; failure skipped")
        }
    }
    Ok(updated)
}

pub struct Orchestrator {
    db: Arc<dyn Database>,
    gateway: Arc<dyn ProviderGateway>,
    provider: ProviderConfig,
    onboarding: OnboardingConfig,
    enricher: Enricher,
}

impl Orchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<dyn ProviderGateway>,
        provider: ProviderConfig,
        onboarding: OnboardingConfig,
    ) -> Self {
        let enricher = Enricher::new(
            Arc::clone(&db),
            Arc::clone(&gateway),
            provider.clone(),
            onboarding.clone(),
        );
        Self {
            db,
            gateway,
            provider,
            onboarding,
            enricher,
        }
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    /// A request carrying the configured defaults.
    pub fn request(&self, cnj: impl Into<String>, workspace_id: impl Into<String>) -> OnboardingRequest {
        OnboardingRequest {
            cnj: cnj.into(),
            workspace_id: workspace_id.into(),
            target_case_id: None,
            force_update: false,
            include_attachments: self.onboarding.include_attachments,
            use_certificate: self.onboarding.use_certificate,
            mode: OnboardingMode::Sync,
        }
    }

    pub async fn onboard(
        &self,
        request: OnboardingRequest,
    ) -> Result<OnboardingResult, OnboardingError> {
        let cnj = Cnj::parse(&request.cnj).map_err(|reason| OnboardingError::InvalidCnj {
            input: request.cnj.clone(),
            reason,
        })?;
        if !cnj.has_valid_check_digits() {
            tracing::debug!(cnj = %cnj, "CNJ check digits do not verify; continuing");
        }

        let case = match request.target_case_id {
            Some(case_id) => Some(self.prepare_case(case_id, &request.workspace_id, &cnj).await?),
            None => None,
        };

        let fetch_options = FetchOptions {
            force_update: request.force_update,
            use_certificate: request.use_certificate,
        };

        tracing::info!(
            cnj = %cnj,
            workspace_id = %request.workspace_id,
            case_id = ?case.as_ref().map(|c| c.id),
            mode = ?request.mode,
            "Starting onboarding"
        );

        if request.mode == OnboardingMode::Async {
            return self.register_update(&cnj, case, &fetch_options).await;
        }

        let snapshot = match self.fetch_snapshot(&cnj, &fetch_options).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                if let Some(case) = &case {
                    fail_onboarding(self.db.as_ref(), case, &err.to_string()).await?;
                }
                return Err(err.into());
            }
        };

        let outcome = self
            .enricher
            .enrich(
                snapshot,
                EnrichmentOptions {
                    include_attachments: request.include_attachments,
                    use_certificate: request.use_certificate,
                },
            )
            .await?;

        let case = match case {
            Some(case) => Some(
                complete_onboarding(self.db.as_ref(), &case, outcome.processo.id)
                    .await?
                    .unwrap_or(case),
            ),
            None => None,
        };

        Ok(OnboardingResult {
            cnj: cnj.to_string(),
            status: OnboardingStatus::Completed,
            case,
            processo_id: Some(outcome.processo.id),
            movements: outcome.movements,
            attachments: outcome.attachments,
            summary: outcome.summary,
            monitoring_subscription_id: outcome.monitoring_subscription_id,
            update_request_id: None,
            warnings: outcome.warnings,
        })
    }

    /// Load the target case and make sure it is ONBOARDING.
    async fn prepare_case(
        &self,
        case_id: Uuid,
        workspace_id: &str,
        cnj: &Cnj,
    ) -> Result<CaseRecord, OnboardingError> {
        let case = self
            .db
            .get_case(case_id)
            .await?
            .filter(|case| case.workspace_id == workspace_id)
            .ok_or(OnboardingError::CaseNotFound(case_id))?;

        if let Some(detected) = case.detected_cnj.as_deref()
            && detected != cnj.as_str()
        {
            return Err(OnboardingError::InvalidCnj {
                input: cnj.to_string(),
                reason: format!("case {case_id} is tracking {detected}"),
            });
        }

        match case.status {
            CaseStatus::Onboarding => Ok(case),
            CaseStatus::Unassigned => {
                let detected = case
                    .detected_cnj
                    .clone()
                    .unwrap_or_else(|| cnj.to_string());
                check_transition(
                    case.status,
                    CaseStatus::Onboarding,
                    Some(detected.as_str()),
                    &case.metadata,
                )?;
                self.db
                    .compare_and_set_case_status(
                        case.id,
                        &CaseStatusUpdate {
                            from: CaseStatus::Unassigned,
                            to: CaseStatus::Onboarding,
                            metadata: case.metadata.for_new_attempt(Utc::now()),
                            processo_id: None,
                            detected_cnj: Some(detected),
                        },
                    )
                    .await?
                    .ok_or_else(|| {
                        OnboardingError::Transition(TransitionError::InvalidRetryState {
                            reason: "case status changed concurrently".to_string(),
                        })
                    })
            }
            other => Err(TransitionError::NotAllowed {
                from: other,
                to: CaseStatus::Onboarding,
            }
            .into()),
        }
    }

    async fn register_update(
        &self,
        cnj: &Cnj,
        case: Option<CaseRecord>,
        options: &FetchOptions,
    ) -> Result<OnboardingResult, OnboardingError> {
        let gateway = self.gateway.as_ref();
        let outcome = retry_transient(self.provider.retry_policy(), "request_update", move || {
            gateway.request_update(cnj, options)
        })
        .await;

        match outcome.result {
            Ok(update) => {
                tracing::info!(
                    cnj = %cnj,
                    request_id = %update.request_id,
                    "Update requested; awaiting provider callback"
                );
                Ok(OnboardingResult::pending(cnj, case, update.request_id))
            }
            Err(err) => {
                if let Some(case) = &case {
                    fail_onboarding(self.db.as_ref(), case, &err.to_string()).await?;
                }
                Err(err.into())
            }
        }
    }

    /// Fetch core process data, retrying transient errors and polling while
    /// the provider is still collecting.
    pub async fn fetch_snapshot(
        &self,
        cnj: &Cnj,
        options: &FetchOptions,
    ) -> Result<ProcessSnapshot, ProviderError> {
        let gateway = self.gateway.as_ref();
        let policy = self.provider.retry_policy();
        let polls = self.provider.poll_attempts;

        let ready = poll_until_ready(polls, self.provider.poll_delay, move || async move {
            let outcome = retry_transient(policy, "fetch_process", move || {
                gateway.fetch_process(cnj, options)
            })
            .await;
            outcome.result.map(|lookup| match lookup {
                ProcessLookup::Found(snapshot) => Poll::Ready(snapshot),
                ProcessLookup::Pending => Poll::Pending,
            })
        })
        .await?;

        ready.ok_or_else(|| {
            ProviderError::transient(format!(
                "provider still collecting {cnj} after {polls} polls"
            ))
        })
    }
}

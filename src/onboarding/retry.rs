//! Retry entry point for cases stuck in UNASSIGNED or ERROR.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::cnj::Cnj;
use crate::config::OnboardingConfig;
use crate::credits::CreditGate;
use crate::db::{CaseRecord, CaseStatusUpdate, Database};
use crate::error::{CreditError, RetryError, TransitionError};
use crate::lifecycle::{CaseStatus, check_transition};

use super::{OnboardingMode, OnboardingResult, OnboardingStatus, Orchestrator};

#[derive(Debug, Clone)]
pub enum RetryResponse {
    /// Synchronous onboarding finished; the case is ACTIVE.
    Completed(OnboardingResult),
    /// The case is ONBOARDING and waits for the provider callback.
    Started { case_id: Uuid },
}

pub struct RetryService {
    db: Arc<dyn Database>,
    credits: Arc<dyn CreditGate>,
    orchestrator: Arc<Orchestrator>,
    config: OnboardingConfig,
}

impl RetryService {
    pub fn new(
        db: Arc<dyn Database>,
        credits: Arc<dyn CreditGate>,
        orchestrator: Arc<Orchestrator>,
        config: OnboardingConfig,
    ) -> Self {
        Self {
            db,
            credits,
            orchestrator,
            config,
        }
    }

    pub async fn retry(
        &self,
        workspace_id: &str,
        case_id: Uuid,
    ) -> Result<RetryResponse, RetryError> {
        self.retry_with_mode(workspace_id, case_id, OnboardingMode::Sync)
            .await
    }

    pub async fn retry_with_mode(
        &self,
        workspace_id: &str,
        case_id: Uuid,
        mode: OnboardingMode,
    ) -> Result<RetryResponse, RetryError> {
        let case = self
            .db
            .get_case(case_id)
            .await?
            .filter(|case| case.workspace_id == workspace_id)
            .ok_or(RetryError::CaseNotFound(case_id))?;

        check_transition(
            case.status,
            CaseStatus::Onboarding,
            case.detected_cnj.as_deref(),
            &case.metadata,
        )
        .map_err(RetryError::NotEligible)?;
        let Some(cnj) = case.detected_cnj.clone() else {
            return Err(RetryError::NotEligible(TransitionError::InvalidRetryState {
                reason: "no CNJ detected for this case".to_string(),
            }));
        };
        if let Err(reason) = Cnj::parse(&cnj) {
            return Err(RetryError::NotEligible(TransitionError::InvalidRetryState {
                reason: format!("stored CNJ is invalid: {reason}"),
            }));
        }

        let cost = self.config.retry_credit_cost;
        if cost > 0 {
            let check = self
                .credits
                .check_credits(workspace_id, cost, &self.config.credit_category)
                .await
                .map_err(RetryError::Credits)?;
            if !check.available {
                tracing::info!(
                    case_id = %case_id,
                    workspace_id,
                    balance = check.balance,
                    required = cost,
                    "Retry rejected: insufficient credits"
                );
                return Err(RetryError::InsufficientCredits {
                    balance: check.balance,
                    required: cost,
                });
            }
        }

        let onboarding = self
            .db
            .compare_and_set_case_status(
                case.id,
                &CaseStatusUpdate {
                    from: case.status,
                    to: CaseStatus::Onboarding,
                    metadata: case.metadata.for_new_attempt(Utc::now()),
                    processo_id: None,
                    detected_cnj: None,
                },
            )
            .await?
            .ok_or_else(|| {
                RetryError::NotEligible(TransitionError::InvalidRetryState {
                    reason: "case status changed concurrently".to_string(),
                })
            })?;

        if cost > 0
            && let Err(err) = self
                .credits
                .debit_credits(
                    workspace_id,
                    cost,
                    &self.config.credit_category,
                    &format!("Retry onboarding of {cnj}"),
                )
                .await
        {
            self.revert(&onboarding, &case).await;
            return Err(match err {
                CreditError::Insufficient { balance, required } => {
                    RetryError::InsufficientCredits { balance, required }
                }
                other => RetryError::Credits(other),
            });
        }

        tracing::info!(
            case_id = %case_id,
            workspace_id,
            attempt = onboarding.metadata.attempts,
            mode = ?mode,
            "Retrying case onboarding"
        );

        let mut request = self.orchestrator.request(cnj, workspace_id);
        request.target_case_id = Some(case_id);
        request.mode = mode;

        let result = self
            .orchestrator
            .onboard(request)
            .await
            .map_err(RetryError::Onboarding)?;

        Ok(match result.status {
            OnboardingStatus::Completed => RetryResponse::Completed(result),
            OnboardingStatus::Pending => RetryResponse::Started { case_id },
        })
    }

    /// Put the case back where it was after a failed debit.
    async fn revert(&self, onboarding: &CaseRecord, previous: &CaseRecord) {
        let restored = self
            .db
            .compare_and_set_case_status(
                onboarding.id,
                &CaseStatusUpdate {
                    from: CaseStatus::Onboarding,
                    to: previous.status,
                    metadata: previous.metadata.clone(),
                    processo_id: None,
                    detected_cnj: None,
                },
            )
            .await;
        match restored {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                case_id = %onboarding.id,
                "Case moved on before the failed debit could be reverted"
            ),
            Err(e) => tracing::error!(
                case_id = %onboarding.id,
                "Failed to revert case after debit failure: {}",
                e
            ),
        }
    }
}

//! Webhook reconciler.
//!
//! Resolves cases left in ONBOARDING by asynchronous onboarding. Every status
//! write is a compare-and-set from ONBOARDING, so redelivered or concurrent
//! callbacks apply at most once; later copies find no ONBOARDING case and
//! are acknowledged as no-ops.

pub mod auth;
pub mod payload;

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;
use uuid::Uuid;

use crate::cnj::Cnj;
use crate::config::WebhookConfig;
use crate::db::{CaseRecord, Database};
use crate::error::{OnboardingError, WebhookError};
use crate::lifecycle::CaseStatus;
use crate::onboarding::{Orchestrator, complete_onboarding, fail_onboarding};
use crate::provider::{FetchOptions, ProcessSnapshot};

pub use payload::{CompletionStatus, Decoded, DecodedWebhook, WebhookEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AckOutcome {
    Activated { case_id: Uuid },
    Failed { case_id: Uuid },
    /// No case is waiting in ONBOARDING for this CNJ (includes redeliveries).
    NoMatchingCase,
    /// Another writer resolved the case while this callback was processed.
    AlreadyResolved { case_id: Uuid },
    MovementNoticed,
    Ignored { event: String },
    /// Enrichment outlived the ack window; it keeps running in the background.
    Deferred { case_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnj: Option<String>,
    pub outcome: AckOutcome,
}

impl Ack {
    fn new(cnj: Option<&Cnj>, outcome: AckOutcome) -> Self {
        Self {
            received: true,
            cnj: cnj.map(ToString::to_string),
            outcome,
        }
    }
}

pub struct Reconciler {
    db: Arc<dyn Database>,
    orchestrator: Arc<Orchestrator>,
    secret: Option<SecretString>,
    ack_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        db: Arc<dyn Database>,
        orchestrator: Arc<Orchestrator>,
        config: &WebhookConfig,
    ) -> Self {
        if config.secret.is_none() {
            tracing::warn!("WEBHOOK_SECRET is not set; provider callbacks are not authenticated");
        }
        Self {
            db,
            orchestrator,
            secret: config.secret.clone(),
            ack_timeout: config.ack_timeout,
        }
    }

    pub async fn handle(
        &self,
        raw_payload: &[u8],
        auth_header: Option<&str>,
    ) -> Result<Ack, WebhookError> {
        auth::verify(self.secret.as_ref(), auth_header)?;

        let decoded = match payload::decode(raw_payload)? {
            Decoded::Known(decoded) => decoded,
            Decoded::Unknown(event) => {
                tracing::info!(event = %event, "Ignoring unhandled webhook event");
                return Ok(Ack::new(None, AckOutcome::Ignored { event }));
            }
        };
        let cnj = decoded.cnj;

        let Some(completion) = decoded.completion else {
            tracing::info!(cnj = %cnj, event = decoded.event.as_str(), "Provider reported new activity");
            return Ok(Ack::new(Some(&cnj), AckOutcome::MovementNoticed));
        };

        let Some(case) = self
            .db
            .find_case_by_cnj(cnj.as_str(), CaseStatus::Onboarding)
            .await?
        else {
            tracing::info!(
                cnj = %cnj,
                event = decoded.event.as_str(),
                "No ONBOARDING case for webhook; acknowledging without changes"
            );
            return Ok(Ack::new(Some(&cnj), AckOutcome::NoMatchingCase));
        };

        let outcome = match completion {
            CompletionStatus::Failed { reason } => {
                match fail_onboarding(self.db.as_ref(), &case, &reason).await {
                    Ok(Some(_)) => AckOutcome::Failed { case_id: case.id },
                    Ok(None) => AckOutcome::AlreadyResolved { case_id: case.id },
                    Err(e) => return Err(into_webhook_error(e)),
                }
            }
            CompletionStatus::Succeeded { process } => {
                self.activate_within_window(case, cnj.clone(), process).await?
            }
        };

        Ok(Ack::new(Some(&cnj), outcome))
    }

    /// Run enrichment on its own task and wait at most `ack_timeout` for it.
    async fn activate_within_window(
        &self,
        case: CaseRecord,
        cnj: Cnj,
        process: Option<serde_json::Value>,
    ) -> Result<AckOutcome, WebhookError> {
        let case_id = case.id;
        let db = Arc::clone(&self.db);
        let orchestrator = Arc::clone(&self.orchestrator);
        let task = tokio::spawn(async move {
            activate_case(db.as_ref(), orchestrator.as_ref(), &case, cnj, process).await
        });

        match tokio::time::timeout(self.ack_timeout, task).await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(OnboardingError::Database(e)))) => Err(WebhookError::Database(e)),
            Ok(Ok(Err(e))) => {
                tracing::error!(case_id = %case_id, "Webhook enrichment failed: {}", e);
                Ok(AckOutcome::Deferred { case_id })
            }
            Ok(Err(join_err)) => {
                tracing::error!(case_id = %case_id, "Webhook enrichment task aborted: {}", join_err);
                Ok(AckOutcome::Deferred { case_id })
            }
            Err(_) => {
                tracing::warn!(
                    case_id = %case_id,
                    timeout_ms = self.ack_timeout.as_millis() as u64,
                    "Webhook enrichment still running; acknowledging as deferred"
                );
                Ok(AckOutcome::Deferred { case_id })
            }
        }
    }
}

async fn activate_case(
    db: &dyn Database,
    orchestrator: &Orchestrator,
    case: &CaseRecord,
    cnj: Cnj,
    process: Option<serde_json::Value>,
) -> Result<AckOutcome, OnboardingError> {
    let enricher = orchestrator.enricher();
    let snapshot = match process {
        Some(payload) => ProcessSnapshot { cnj, payload },
        None => {
            let options = FetchOptions {
                force_update: false,
                use_certificate: enricher.default_options().use_certificate,
            };
            match orchestrator.fetch_snapshot(&cnj, &options).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    return Ok(match fail_onboarding(db, case, &err.to_string()).await? {
                        Some(_) => AckOutcome::Failed { case_id: case.id },
                        None => AckOutcome::AlreadyResolved { case_id: case.id },
                    });
                }
            }
        }
    };

    let outcome = enricher.enrich(snapshot, enricher.default_options()).await?;
    Ok(
        match complete_onboarding(db, case, outcome.processo.id).await? {
            Some(_) => AckOutcome::Activated { case_id: case.id },
            None => AckOutcome::AlreadyResolved { case_id: case.id },
        },
    )
}

fn into_webhook_error(err: OnboardingError) -> WebhookError {
    match err {
        OnboardingError::Database(e) => WebhookError::Database(e),
        other => WebhookError::Reconciliation(other),
    }
}

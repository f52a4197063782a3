//! Post-fetch enrichment shared by synchronous onboarding and the webhook
//! reconciler.
//!
//! Only persisting the Processo is fatal. Movements, attachments, the summary
//! and the monitoring subscription are best effort: a failure there becomes an
//! [`EnrichmentWarning`] and the pipeline moves on.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::cnj::Cnj;
use crate::config::{OnboardingConfig, ProviderConfig};
use crate::db::{DadosCompletos, Database, ProcessoRecord, UpsertSubscriptionParams};
use crate::error::{OnboardingError, ProviderError};
use crate::provider::{
    Attachment, AttachmentOptions, Movement, ProcessSnapshot, ProviderGateway, Summary,
    drain_movements,
};
use crate::retry::retry_transient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStep {
    Movements,
    Attachments,
    Summary,
    Monitoring,
}

impl EnrichmentStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movements => "movements",
            Self::Attachments => "attachments",
            Self::Summary => "summary",
            Self::Monitoring => "monitoring",
        }
    }
}

/// A best-effort step that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentWarning {
    pub step: EnrichmentStep,
    pub message: String,
}

/// Per-run switches, taken from the request with config defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentOptions {
    pub include_attachments: bool,
    pub use_certificate: bool,
}

#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub processo: ProcessoRecord,
    /// Whether the Processo row was created by this run.
    pub created: bool,
    pub movements: usize,
    pub attachments: usize,
    pub summary: bool,
    pub monitoring_subscription_id: Option<String>,
    pub warnings: Vec<EnrichmentWarning>,
}

#[derive(Clone)]
pub struct Enricher {
    db: Arc<dyn Database>,
    gateway: Arc<dyn ProviderGateway>,
    provider: ProviderConfig,
    onboarding: OnboardingConfig,
}

impl Enricher {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<dyn ProviderGateway>,
        provider: ProviderConfig,
        onboarding: OnboardingConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            provider,
            onboarding,
        }
    }

    pub fn default_options(&self) -> EnrichmentOptions {
        EnrichmentOptions {
            include_attachments: self.onboarding.include_attachments,
            use_certificate: self.onboarding.use_certificate,
        }
    }

    /// Fetch the secondary data for `snapshot`, persist the Processo and
    /// make sure a monitoring subscription exists.
    pub async fn enrich(
        &self,
        snapshot: ProcessSnapshot,
        options: EnrichmentOptions,
    ) -> Result<EnrichmentOutcome, OnboardingError> {
        let cnj = snapshot.cnj.clone();
        let mut warnings = Vec::new();

        let movements = match self.fetch_movements(&cnj).await {
            Ok(items) => items,
            Err(e) => {
                warnings.push(warn_step(&cnj, EnrichmentStep::Movements, &e));
                Vec::new()
            }
        };

        let attachments = if options.include_attachments {
            match self.fetch_attachments(&cnj, options.use_certificate).await {
                Ok(items) => items,
                Err(e) => {
                    warnings.push(warn_step(&cnj, EnrichmentStep::Attachments, &e));
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let summary = match self.fetch_summary(&cnj).await {
            Ok(summary) => summary,
            Err(e) => {
                warnings.push(warn_step(&cnj, EnrichmentStep::Summary, &e));
                None
            }
        };

        let movement_count = movements.len();
        let attachment_count = attachments.len();
        let has_summary = summary.is_some();
        let (processo, created) = self
            .persist(&cnj, snapshot.payload, movements, attachments, summary)
            .await?;

        let monitoring_subscription_id = match self.ensure_monitoring(&cnj).await {
            Ok(id) => Some(id),
            Err(e) => {
                warnings.push(EnrichmentWarning {
                    step: EnrichmentStep::Monitoring,
                    message: e.clone(),
                });
                tracing::warn!(cnj = %cnj, step = "monitoring", "Enrichment step failed: {}", e);
                None
            }
        };

        tracing::info!(
            cnj = %cnj,
            processo_id = %processo.id,
            created,
            movements = movement_count,
            attachments = attachment_count,
            summary = has_summary,
            warnings = warnings.len(),
            "Processo enriched"
        );

        Ok(EnrichmentOutcome {
            processo,
            created,
            movements: movement_count,
            attachments: attachment_count,
            summary: has_summary,
            monitoring_subscription_id,
            warnings,
        })
    }

    async fn fetch_movements(&self, cnj: &Cnj) -> Result<Vec<Movement>, ProviderError> {
        let gateway = self.gateway.as_ref();
        let max_pages = self.provider.max_movement_pages;
        retry_transient(self.provider.retry_policy(), "fetch_movements", move || {
            drain_movements(gateway, cnj, max_pages)
        })
        .await
        .result
    }

    async fn fetch_attachments(
        &self,
        cnj: &Cnj,
        use_certificate: bool,
    ) -> Result<Vec<Attachment>, ProviderError> {
        let gateway = self.gateway.as_ref();
        let options = AttachmentOptions {
            use_certificate,
            limit: self.onboarding.attachment_limit,
        };
        let options = &options;
        retry_transient(self.provider.retry_policy(), "fetch_attachments", move || {
            gateway.fetch_attachments(cnj, options)
        })
        .await
        .result
    }

    /// Request a summary, wait once, fetch once. A missing summary is not an error.
    async fn fetch_summary(&self, cnj: &Cnj) -> Result<Option<Summary>, ProviderError> {
        let gateway = self.gateway.as_ref();
        let policy = self.provider.retry_policy();
        retry_transient(policy, "request_summary", move || gateway.request_summary(cnj))
            .await
            .result?;

        if !self.provider.summary_wait.is_zero() {
            tokio::time::sleep(self.provider.summary_wait).await;
        }

        retry_transient(policy, "fetch_summary", move || gateway.fetch_summary(cnj))
            .await
            .result
    }

    async fn persist(
        &self,
        cnj: &Cnj,
        payload: serde_json::Value,
        movements: Vec<Movement>,
        attachments: Vec<Attachment>,
        summary: Option<Summary>,
    ) -> Result<(ProcessoRecord, bool), OnboardingError> {
        let dados = DadosCompletos {
            provider: self.gateway.name().to_string(),
            payload,
            movimentacoes: movements,
            anexos: attachments,
            resumo: summary,
            fetched_at: Utc::now(),
        };

        // The store merges under its own lock so concurrent monitoring appends survive.
        let merged = self.db.merge_processo(cnj.as_str(), &dados).await?;
        Ok((merged.processo, merged.created))
    }

    /// Reuse an active subscription, otherwise register one with the provider.
    async fn ensure_monitoring(&self, cnj: &Cnj) -> Result<String, String> {
        if let Some(existing) = self
            .db
            .get_subscription_by_cnj(cnj.as_str())
            .await
            .map_err(|e| e.to_string())?
            && existing.active
        {
            return Ok(existing.provider_subscription_id);
        }

        let gateway = self.gateway.as_ref();
        let frequency = self.onboarding.monitoring_frequency;
        let subscription_id = retry_transient(
            self.provider.retry_policy(),
            "configure_monitoring",
            move || gateway.configure_monitoring(cnj, frequency),
        )
        .await
        .result
        .map_err(|e| e.to_string())?;

        self.db
            .upsert_subscription(&UpsertSubscriptionParams {
                cnj: cnj.as_str().to_string(),
                provider_subscription_id: subscription_id.clone(),
                frequency,
            })
            .await
            .map_err(|e| e.to_string())?;
        Ok(subscription_id)
    }
}

fn warn_step(cnj: &Cnj, step: EnrichmentStep, err: &ProviderError) -> EnrichmentWarning {
    tracing::warn!(cnj = %cnj, step = step.as_str(), "Enrichment step failed: {}", err);
    EnrichmentWarning {
        step,
        message: err.to_string(),
    }
}

//! Re-drives cases that have sat in ONBOARDING too long.
//!
//! Catches callbacks that never arrived and webhook enrichment that was
//! deferred and then died. Each stale case gets one synchronous onboarding
//! attempt; failures are isolated per case.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::db::{CaseRecord, Database};
use crate::error::{MonitorError, OnboardingError};
use crate::lifecycle::CaseStatus;
use crate::onboarding::{OnboardingMode, Orchestrator, fail_onboarding};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub activated: usize,
    pub errored: usize,
    pub skipped: usize,
}

pub struct StaleOnboardingSweep {
    db: Arc<dyn Database>,
    orchestrator: Arc<Orchestrator>,
}

impl StaleOnboardingSweep {
    pub fn new(db: Arc<dyn Database>, orchestrator: Arc<Orchestrator>) -> Self {
        Self { db, orchestrator }
    }

    pub async fn run(&self, older_than: Duration) -> Result<SweepReport, MonitorError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| MonitorError::InvalidConfig(format!("invalid sweep threshold: {e}")))?;
        let cutoff = Utc::now() - age;
        let stale = self
            .db
            .list_cases_by_status(CaseStatus::Onboarding, Some(cutoff))
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        if stale.is_empty() {
            tracing::debug!("No stale onboarding cases");
            return Ok(report);
        }
        tracing::info!(cases = stale.len(), cutoff = %cutoff, "Sweeping stale onboarding cases");

        for case in stale {
            match self.redrive(&case).await {
                Ok(SweepOutcome::Activated) => report.activated += 1,
                Ok(SweepOutcome::Errored) => report.errored += 1,
                Ok(SweepOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(case_id = %case.id, "Stale onboarding re-drive failed: {}", e);
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            activated = report.activated,
            errored = report.errored,
            skipped = report.skipped,
            "Stale onboarding sweep finished"
        );
        Ok(report)
    }

    async fn redrive(&self, case: &CaseRecord) -> Result<SweepOutcome, OnboardingError> {
        let Some(cnj) = case.detected_cnj.clone() else {
            return self.give_up(case, "no CNJ detected for this case").await;
        };

        let mut request = self.orchestrator.request(cnj, case.workspace_id.clone());
        request.target_case_id = Some(case.id);
        request.mode = OnboardingMode::Sync;

        match self.orchestrator.onboard(request).await {
            Ok(result) => Ok(match result.case.map(|c| c.status) {
                Some(CaseStatus::Active) => SweepOutcome::Activated,
                _ => SweepOutcome::Skipped,
            }),
            // The orchestrator already moved the case to ERROR.
            Err(OnboardingError::Provider(_) | OnboardingError::ProcessNotFound { .. }) => {
                Ok(SweepOutcome::Errored)
            }
            Err(OnboardingError::InvalidCnj { reason, .. }) => self.give_up(case, &reason).await,
            Err(e) => Err(e),
        }
    }

    async fn give_up(
        &self,
        case: &CaseRecord,
        reason: &str,
    ) -> Result<SweepOutcome, OnboardingError> {
        Ok(match fail_onboarding(self.db.as_ref(), case, reason).await? {
            Some(_) => SweepOutcome::Errored,
            None => SweepOutcome::Skipped,
        })
    }
}

enum SweepOutcome {
    Activated,
    Errored,
    Skipped,
}

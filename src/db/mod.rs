//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies the case,
//! processo, monitoring and workspace stores. Two implementations exist:
//!
//! - `memory`: process-local maps behind a mutex, used by tests and dry runs
//! - `libsql` (default feature): libSQL (Turso's SQLite fork) for embedded deployment
//!
//! Case status changes are compare-and-set on the current status in every
//! backend, so concurrent writers (orchestrator, reconciler, sweep) never
//! lose updates: the loser simply observes `None`.

#[cfg(feature = "libsql")]
pub mod libsql;

pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::lifecycle::{CaseMetadata, CaseStatus};
use crate::provider::{Attachment, MonitoringFrequency, Movement, Summary};

pub use memory::MemoryBackend;

/// Create a database backend from configuration, run migrations, and return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    match config.backend {
        crate::config::DatabaseBackend::Memory => {
            tracing::warn!("Using in-memory database; state is lost on exit");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "libsql")]
        crate::config::DatabaseBackend::LibSql => {
            let backend = libsql::LibSqlBackend::new_local(&config.libsql_path)
                .await
                .map_err(|e| DatabaseError::Pool(e.to_string()))?;
            backend.run_migrations().await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "libsql"))]
        crate::config::DatabaseBackend::LibSql => Err(DatabaseError::Pool(
            "libSQL backend requested but the 'libsql' feature is disabled".to_string(),
        )),
    }
}

/// A workspace's claim on a court process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseRecord {
    pub id: Uuid,
    pub workspace_id: String,
    /// Identifier as entered or imported.
    pub number: String,
    /// Normalized CNJ once detected.
    pub detected_cnj: Option<String>,
    pub status: CaseStatus,
    pub metadata: CaseMetadata,
    pub processo_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateCaseParams {
    pub workspace_id: String,
    pub number: String,
    pub detected_cnj: Option<String>,
    pub status: CaseStatus,
    pub metadata: CaseMetadata,
}

/// Conditional status write: applied only while the case is still in `from`.
#[derive(Debug, Clone)]
pub struct CaseStatusUpdate {
    pub from: CaseStatus,
    pub to: CaseStatus,
    pub metadata: CaseMetadata,
    /// Linked Processo; `None` leaves the current link untouched.
    pub processo_id: Option<Uuid>,
    /// Normalized CNJ to record; `None` keeps the stored one.
    pub detected_cnj: Option<String>,
}

/// Provider data envelope stored on a Processo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DadosCompletos {
    pub provider: String,
    /// Raw provider process payload.
    pub payload: serde_json::Value,
    #[serde(default)]
    pub movimentacoes: Vec<Movement>,
    #[serde(default)]
    pub anexos: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumo: Option<Summary>,
    pub fetched_at: DateTime<Utc>,
}

/// Enriched court process, unique per CNJ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessoRecord {
    pub id: Uuid,
    pub cnj: String,
    pub dados_completos: DadosCompletos,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of [`ProcessoStore::merge_processo`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergedProcesso {
    pub processo: ProcessoRecord,
    /// Whether the row did not exist before this call.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringSubscriptionRecord {
    pub id: Uuid,
    pub cnj: String,
    pub provider_subscription_id: String,
    pub frequency: MonitoringFrequency,
    pub active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UpsertSubscriptionParams {
    pub cnj: String,
    pub provider_subscription_id: String,
    pub frequency: MonitoringFrequency,
}

/// Merge `incoming` into `existing`, skipping ids already present.
///
/// Keeps the list ordered by `occurred_at` and returns how many were added.
pub fn merge_movements(existing: &mut Vec<Movement>, incoming: &[Movement]) -> usize {
    let mut known: HashSet<String> = existing.iter().map(|m| m.id.clone()).collect();
    let mut added = 0;
    for movement in incoming {
        if known.insert(movement.id.clone()) {
            existing.push(movement.clone());
            added += 1;
        }
    }
    if added > 0 {
        existing.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then_with(|| a.id.cmp(&b.id)));
    }
    added
}

/// Fold a freshly fetched envelope into the stored one.
///
/// Stored movements are never dropped. Attachments and the summary are only
/// replaced when the fresh fetch produced them.
pub fn merge_dados(stored: &mut DadosCompletos, fresh: &DadosCompletos) {
    merge_movements(&mut stored.movimentacoes, &fresh.movimentacoes);
    stored.provider = fresh.provider.clone();
    stored.payload = fresh.payload.clone();
    if !fresh.anexos.is_empty() {
        stored.anexos = fresh.anexos.clone();
    }
    if fresh.resumo.is_some() {
        stored.resumo = fresh.resumo.clone();
    }
    stored.fetched_at = fresh.fetched_at;
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn create_case(&self, input: &CreateCaseParams) -> Result<CaseRecord, DatabaseError>;
    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseRecord>, DatabaseError>;
    /// Oldest case with this CNJ in `status`, if any.
    async fn find_case_by_cnj(
        &self,
        cnj: &str,
        status: CaseStatus,
    ) -> Result<Option<CaseRecord>, DatabaseError>;
    /// Cases in `status`, optionally only those not touched since `updated_before`.
    async fn list_cases_by_status(
        &self,
        status: CaseStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<CaseRecord>, DatabaseError>;
    /// Compare-and-set on status. `Ok(None)` when the case is missing or no longer in `update.from`.
    async fn compare_and_set_case_status(
        &self,
        case_id: Uuid,
        update: &CaseStatusUpdate,
    ) -> Result<Option<CaseRecord>, DatabaseError>;
}

#[async_trait]
pub trait ProcessoStore: Send + Sync {
    async fn get_processo_by_cnj(&self, cnj: &str)
    -> Result<Option<ProcessoRecord>, DatabaseError>;
    /// Insert the Processo or atomically fold `dados` into the stored envelope
    /// with [`merge_dados`].
    async fn merge_processo(
        &self,
        cnj: &str,
        dados: &DadosCompletos,
    ) -> Result<MergedProcesso, DatabaseError>;
    /// Atomically merge movements into an existing Processo. Returns how many were new.
    async fn append_movements(
        &self,
        cnj: &str,
        movements: &[Movement],
    ) -> Result<usize, DatabaseError>;
}

#[async_trait]
pub trait MonitoringStore: Send + Sync {
    /// At most one subscription per CNJ; an existing one is reactivated and updated.
    async fn upsert_subscription(
        &self,
        input: &UpsertSubscriptionParams,
    ) -> Result<MonitoringSubscriptionRecord, DatabaseError>;
    async fn get_subscription_by_cnj(
        &self,
        cnj: &str,
    ) -> Result<Option<MonitoringSubscriptionRecord>, DatabaseError>;
    async fn list_active_subscriptions(
        &self,
    ) -> Result<Vec<MonitoringSubscriptionRecord>, DatabaseError>;
    async fn mark_subscription_checked(
        &self,
        subscription_id: Uuid,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Increment and return the workspace's process counter.
    async fn increment_process_count(&self, workspace_id: &str) -> Result<i64, DatabaseError>;
    async fn get_process_count(&self, workspace_id: &str) -> Result<i64, DatabaseError>;
}

#[async_trait]
pub trait Database:
    CaseStore + ProcessoStore + MonitoringStore + WorkspaceStore + Send + Sync
{
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn movement(id: &str, day: u32) -> Movement {
        Movement {
            id: id.to_string(),
            occurred_at: Utc
                .with_ymd_and_hms(2024, 3, day, 12, 0, 0)
                .single()
                .expect("valid date"),
            content: format!("movement {id}"),
            kind: None,
        }
    }

    fn envelope(movements: Vec<Movement>) -> DadosCompletos {
        DadosCompletos {
            provider: "escavador".to_string(),
            payload: serde_json::json!({ "classe": "Execução Fiscal" }),
            movimentacoes: movements,
            anexos: Vec::new(),
            resumo: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn merge_dados_keeps_stored_movements_and_enrichment() {
        let mut stored = envelope(vec![movement("a", 1), movement("z", 9)]);
        stored.resumo = Some(crate::provider::Summary {
            content: "resumo anterior".to_string(),
            generated_at: Utc::now(),
        });
        let fresh = envelope(vec![movement("a", 1), movement("b", 2)]);

        merge_dados(&mut stored, &fresh);

        let ids: Vec<_> = stored.movimentacoes.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "z"]);
        assert_eq!(
            stored.resumo.as_ref().map(|s| s.content.as_str()),
            Some("resumo anterior")
        );
        assert_eq!(stored.fetched_at, fresh.fetched_at);
    }

    #[test]
    fn merge_skips_known_ids_and_orders_by_date() {
        let mut existing = vec![movement("a", 1), movement("c", 3)];
        let added = merge_movements(
            &mut existing,
            &[movement("c", 3), movement("b", 2), movement("b", 2)],
        );

        assert_eq!(added, 1);
        let ids: Vec<_> = existing.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_of_nothing_new_leaves_list_untouched() {
        let mut existing = vec![movement("z", 5), movement("a", 1)];
        assert_eq!(merge_movements(&mut existing, &[movement("a", 1)]), 0);
        let ids: Vec<_> = existing.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }
}

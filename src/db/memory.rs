//! In-memory backend.
//!
//! All state sits behind one mutex; every operation is a single critical
//! section, which gives compare-and-set and movement merges the same
//! atomicity the libSQL backend gets from conditional updates and
//! transactions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{
    CaseRecord, CaseStatusUpdate, CaseStore, CreateCaseParams, DadosCompletos, Database,
    MergedProcesso, MonitoringStore, MonitoringSubscriptionRecord, ProcessoRecord, ProcessoStore,
    UpsertSubscriptionParams, WorkspaceStore, merge_dados, merge_movements,
};
use crate::error::DatabaseError;
use crate::lifecycle::CaseStatus;
use crate::provider::Movement;

#[derive(Debug, Default)]
struct MemoryState {
    cases: HashMap<Uuid, CaseRecord>,
    processos: HashMap<String, ProcessoRecord>,
    subscriptions: HashMap<String, MonitoringSubscriptionRecord>,
    process_counts: HashMap<String, i64>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, DatabaseError> {
        self.state
            .lock()
            .map_err(|e| DatabaseError::Pool(format!("memory backend lock poisoned: {e}")))
    }
}

#[async_trait]
impl CaseStore for MemoryBackend {
    async fn create_case(&self, input: &CreateCaseParams) -> Result<CaseRecord, DatabaseError> {
        let now = Utc::now();
        let record = CaseRecord {
            id: Uuid::new_v4(),
            workspace_id: input.workspace_id.clone(),
            number: input.number.trim().to_string(),
            detected_cnj: input.detected_cnj.clone(),
            status: input.status,
            metadata: input.metadata.clone(),
            processo_id: None,
            created_at: now,
            updated_at: now,
        };
        self.lock()?.cases.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseRecord>, DatabaseError> {
        Ok(self.lock()?.cases.get(&case_id).cloned())
    }

    async fn find_case_by_cnj(
        &self,
        cnj: &str,
        status: CaseStatus,
    ) -> Result<Option<CaseRecord>, DatabaseError> {
        Ok(self
            .lock()?
            .cases
            .values()
            .filter(|case| case.status == status && case.detected_cnj.as_deref() == Some(cnj))
            .min_by_key(|case| (case.created_at, case.id))
            .cloned())
    }

    async fn list_cases_by_status(
        &self,
        status: CaseStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let mut out: Vec<CaseRecord> = self
            .lock()?
            .cases
            .values()
            .filter(|case| case.status == status)
            .filter(|case| updated_before.is_none_or(|cutoff| case.updated_at < cutoff))
            .cloned()
            .collect();
        out.sort_by_key(|case| (case.created_at, case.id));
        Ok(out)
    }

    async fn compare_and_set_case_status(
        &self,
        case_id: Uuid,
        update: &CaseStatusUpdate,
    ) -> Result<Option<CaseRecord>, DatabaseError> {
        let mut state = self.lock()?;
        let Some(case) = state.cases.get_mut(&case_id) else {
            return Ok(None);
        };
        if case.status != update.from {
            return Ok(None);
        }
        case.status = update.to;
        case.metadata = update.metadata.clone();
        if let Some(processo_id) = update.processo_id {
            case.processo_id = Some(processo_id);
        }
        if let Some(cnj) = &update.detected_cnj {
            case.detected_cnj = Some(cnj.clone());
        }
        case.updated_at = Utc::now();
        Ok(Some(case.clone()))
    }
}

#[async_trait]
impl ProcessoStore for MemoryBackend {
    async fn get_processo_by_cnj(
        &self,
        cnj: &str,
    ) -> Result<Option<ProcessoRecord>, DatabaseError> {
        Ok(self.lock()?.processos.get(cnj).cloned())
    }

    async fn merge_processo(
        &self,
        cnj: &str,
        dados: &DadosCompletos,
    ) -> Result<MergedProcesso, DatabaseError> {
        let now = Utc::now();
        let mut state = self.lock()?;
        if let Some(existing) = state.processos.get_mut(cnj) {
            merge_dados(&mut existing.dados_completos, dados);
            existing.updated_at = now;
            return Ok(MergedProcesso {
                processo: existing.clone(),
                created: false,
            });
        }

        let mut fresh = dados.clone();
        fresh.movimentacoes.clear();
        merge_movements(&mut fresh.movimentacoes, &dados.movimentacoes);
        let record = ProcessoRecord {
            id: Uuid::new_v4(),
            cnj: cnj.to_string(),
            dados_completos: fresh,
            created_at: now,
            updated_at: now,
        };
        state.processos.insert(cnj.to_string(), record.clone());
        Ok(MergedProcesso {
            processo: record,
            created: true,
        })
    }

    async fn append_movements(
        &self,
        cnj: &str,
        movements: &[Movement],
    ) -> Result<usize, DatabaseError> {
        let mut state = self.lock()?;
        let processo = state
            .processos
            .get_mut(cnj)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "processo",
                id: cnj.to_string(),
            })?;
        let added = merge_movements(&mut processo.dados_completos.movimentacoes, movements);
        if added > 0 {
            processo.updated_at = Utc::now();
        }
        Ok(added)
    }
}

#[async_trait]
impl MonitoringStore for MemoryBackend {
    async fn upsert_subscription(
        &self,
        input: &UpsertSubscriptionParams,
    ) -> Result<MonitoringSubscriptionRecord, DatabaseError> {
        let mut state = self.lock()?;
        let record = state
            .subscriptions
            .entry(input.cnj.clone())
            .and_modify(|existing| {
                existing.provider_subscription_id = input.provider_subscription_id.clone();
                existing.frequency = input.frequency;
                existing.active = true;
            })
            .or_insert_with(|| MonitoringSubscriptionRecord {
                id: Uuid::new_v4(),
                cnj: input.cnj.clone(),
                provider_subscription_id: input.provider_subscription_id.clone(),
                frequency: input.frequency,
                active: true,
                last_checked_at: None,
                created_at: Utc::now(),
            });
        Ok(record.clone())
    }

    async fn get_subscription_by_cnj(
        &self,
        cnj: &str,
    ) -> Result<Option<MonitoringSubscriptionRecord>, DatabaseError> {
        Ok(self.lock()?.subscriptions.get(cnj).cloned())
    }

    async fn list_active_subscriptions(
        &self,
    ) -> Result<Vec<MonitoringSubscriptionRecord>, DatabaseError> {
        let mut out: Vec<_> = self
            .lock()?
            .subscriptions
            .values()
            .filter(|sub| sub.active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.cnj.cmp(&b.cnj));
        Ok(out)
    }

    async fn mark_subscription_checked(
        &self,
        subscription_id: Uuid,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.lock()?;
        let sub = state
            .subscriptions
            .values_mut()
            .find(|sub| sub.id == subscription_id)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "monitoring subscription",
                id: subscription_id.to_string(),
            })?;
        sub.last_checked_at = Some(checked_at);
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for MemoryBackend {
    async fn increment_process_count(&self, workspace_id: &str) -> Result<i64, DatabaseError> {
        let mut state = self.lock()?;
        let count = state
            .process_counts
            .entry(workspace_id.to_string())
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn get_process_count(&self, workspace_id: &str) -> Result<i64, DatabaseError> {
        Ok(self
            .lock()?
            .process_counts
            .get(workspace_id)
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl Database for MemoryBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

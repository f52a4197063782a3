use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use crate::db::{
    DadosCompletos, MergedProcesso, MonitoringStore, MonitoringSubscriptionRecord, ProcessoRecord,
    ProcessoStore, UpsertSubscriptionParams, merge_dados, merge_movements,
};
use crate::error::DatabaseError;
use crate::provider::{MonitoringFrequency, Movement};

use super::{
    LibSqlBackend, fmt_ts, get_i64, get_opt_text, get_text, parse_timestamp, parse_timestamp_opt,
};

const PROCESSO_COLUMNS: &str = "id, cnj, dados_completos, created_at, updated_at";
const SUBSCRIPTION_COLUMNS: &str =
    "id, cnj, provider_subscription_id, frequency, active, last_checked_at, created_at";

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {} uuid: {}", field, e)))
}

fn serialize_dados(dados: &DadosCompletos) -> Result<String, DatabaseError> {
    serde_json::to_string(dados).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn row_to_processo_record(row: &libsql::Row) -> Result<ProcessoRecord, DatabaseError> {
    let dados_completos: DadosCompletos = serde_json::from_str(&get_text(row, 2))
        .map_err(|e| DatabaseError::Serialization(format!("invalid dados_completos: {e}")))?;

    Ok(ProcessoRecord {
        id: parse_uuid(&get_text(row, 0), "processos.id")?,
        cnj: get_text(row, 1),
        dados_completos,
        created_at: parse_timestamp(&get_text(row, 3))?,
        updated_at: parse_timestamp(&get_text(row, 4))?,
    })
}

fn row_to_subscription_record(
    row: &libsql::Row,
) -> Result<MonitoringSubscriptionRecord, DatabaseError> {
    let frequency_raw = get_text(row, 3);
    let frequency = MonitoringFrequency::from_db_value(&frequency_raw).ok_or_else(|| {
        DatabaseError::Serialization(format!("invalid monitoring frequency '{frequency_raw}'"))
    })?;

    Ok(MonitoringSubscriptionRecord {
        id: parse_uuid(&get_text(row, 0), "monitoring_subscriptions.id")?,
        cnj: get_text(row, 1),
        provider_subscription_id: get_text(row, 2),
        frequency,
        active: get_i64(row, 4) != 0,
        last_checked_at: parse_timestamp_opt(get_opt_text(row, 5))?,
        created_at: parse_timestamp(&get_text(row, 6))?,
    })
}

impl LibSqlBackend {
    async fn query_processo(
        conn: &libsql::Connection,
        cnj: &str,
    ) -> Result<Option<ProcessoRecord>, DatabaseError> {
        let row = conn
            .query(
                &format!("SELECT {PROCESSO_COLUMNS} FROM processos WHERE cnj = ?1 LIMIT 1"),
                params![cnj],
            )
            .await?
            .next()
            .await?;
        row.as_ref().map(row_to_processo_record).transpose()
    }
}

#[async_trait]
impl ProcessoStore for LibSqlBackend {
    async fn get_processo_by_cnj(
        &self,
        cnj: &str,
    ) -> Result<Option<ProcessoRecord>, DatabaseError> {
        let conn = self.connect().await?;
        Self::query_processo(&conn, cnj).await
    }

    async fn merge_processo(
        &self,
        cnj: &str,
        dados: &DadosCompletos,
    ) -> Result<MergedProcesso, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let merge_result = async {
            let now = fmt_ts(&Utc::now());
            let created = match Self::query_processo(&conn, cnj).await? {
                Some(mut processo) => {
                    merge_dados(&mut processo.dados_completos, dados);
                    conn.execute(
                        "UPDATE processos SET dados_completos = ?1, updated_at = ?2 WHERE cnj = ?3",
                        params![serialize_dados(&processo.dados_completos)?, now, cnj],
                    )
                    .await?;
                    false
                }
                None => {
                    let mut fresh = dados.clone();
                    fresh.movimentacoes.clear();
                    merge_movements(&mut fresh.movimentacoes, &dados.movimentacoes);
                    conn.execute(
                        "INSERT INTO processos (id, cnj, dados_completos, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?4)",
                        params![Uuid::new_v4().to_string(), cnj, serialize_dados(&fresh)?, now],
                    )
                    .await?;
                    true
                }
            };
            let processo = Self::query_processo(&conn, cnj)
                .await?
                .ok_or_else(|| DatabaseError::Query("failed to load merged processo".to_string()))?;
            Ok::<_, DatabaseError>(MergedProcesso { processo, created })
        }
        .await;

        match merge_result {
            Ok(merged) => {
                conn.execute("COMMIT", ()).await?;
                Ok(merged)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn append_movements(
        &self,
        cnj: &str,
        movements: &[Movement],
    ) -> Result<usize, DatabaseError> {
        let conn = self.connect().await?;
        // IMMEDIATE takes the write lock up front so concurrent merges serialize.
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let merge_result = async {
            let mut processo =
                Self::query_processo(&conn, cnj)
                    .await?
                    .ok_or_else(|| DatabaseError::NotFound {
                        entity: "processo",
                        id: cnj.to_string(),
                    })?;

            let added = merge_movements(&mut processo.dados_completos.movimentacoes, movements);
            if added > 0 {
                conn.execute(
                    "UPDATE processos SET dados_completos = ?1, updated_at = ?2 WHERE cnj = ?3",
                    params![
                        serialize_dados(&processo.dados_completos)?,
                        fmt_ts(&Utc::now()),
                        cnj,
                    ],
                )
                .await?;
            }
            Ok::<_, DatabaseError>(added)
        }
        .await;

        match merge_result {
            Ok(added) => {
                conn.execute("COMMIT", ()).await?;
                Ok(added)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl MonitoringStore for LibSqlBackend {
    async fn upsert_subscription(
        &self,
        input: &UpsertSubscriptionParams,
    ) -> Result<MonitoringSubscriptionRecord, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO monitoring_subscriptions \
             (id, cnj, provider_subscription_id, frequency, active, last_checked_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, 1, NULL, ?5) \
             ON CONFLICT (cnj) DO UPDATE SET \
                provider_subscription_id = excluded.provider_subscription_id, \
                frequency = excluded.frequency, \
                active = 1",
            params![
                Uuid::new_v4().to_string(),
                input.cnj.as_str(),
                input.provider_subscription_id.as_str(),
                input.frequency.as_str(),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_subscription_by_cnj(&input.cnj)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load upserted subscription".to_string()))
    }

    async fn get_subscription_by_cnj(
        &self,
        cnj: &str,
    ) -> Result<Option<MonitoringSubscriptionRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM monitoring_subscriptions \
                     WHERE cnj = ?1 LIMIT 1"
                ),
                params![cnj],
            )
            .await?
            .next()
            .await?;
        row.as_ref().map(row_to_subscription_record).transpose()
    }

    async fn list_active_subscriptions(
        &self,
    ) -> Result<Vec<MonitoringSubscriptionRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM monitoring_subscriptions \
                     WHERE active = 1 ORDER BY cnj ASC"
                ),
                (),
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_subscription_record(&row)?);
        }
        Ok(out)
    }

    async fn mark_subscription_checked(
        &self,
        subscription_id: Uuid,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE monitoring_subscriptions SET last_checked_at = ?1 WHERE id = ?2",
                params![fmt_ts(&checked_at), subscription_id.to_string()],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "monitoring subscription",
                id: subscription_id.to_string(),
            });
        }
        Ok(())
    }
}

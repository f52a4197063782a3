use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use crate::db::{CaseRecord, CaseStatusUpdate, CaseStore, CreateCaseParams, WorkspaceStore};
use crate::error::DatabaseError;
use crate::lifecycle::{CaseMetadata, CaseStatus};

use super::{
    LibSqlBackend, fmt_ts, get_i64, get_opt_text, get_text, opt_text, opt_text_owned,
    parse_timestamp,
};

const CASE_COLUMNS: &str = "id, workspace_id, number, detected_cnj, status, metadata, processo_id, created_at, updated_at";

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {} uuid: {}", field, e)))
}

fn parse_case_status(raw: &str) -> Result<CaseStatus, DatabaseError> {
    CaseStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid case status '{}'", raw)))
}

fn parse_metadata(raw: &str) -> Result<CaseMetadata, DatabaseError> {
    if raw.trim().is_empty() {
        return Ok(CaseMetadata::default());
    }
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn serialize_metadata(metadata: &CaseMetadata) -> Result<String, DatabaseError> {
    serde_json::to_string(metadata).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn row_to_case_record(row: &libsql::Row) -> Result<CaseRecord, DatabaseError> {
    let processo_id = match get_opt_text(row, 6) {
        Some(raw) => Some(parse_uuid(&raw, "cases.processo_id")?),
        None => None,
    };

    Ok(CaseRecord {
        id: parse_uuid(&get_text(row, 0), "cases.id")?,
        workspace_id: get_text(row, 1),
        number: get_text(row, 2),
        detected_cnj: get_opt_text(row, 3),
        status: parse_case_status(&get_text(row, 4))?,
        metadata: parse_metadata(&get_text(row, 5))?,
        processo_id,
        created_at: parse_timestamp(&get_text(row, 7))?,
        updated_at: parse_timestamp(&get_text(row, 8))?,
    })
}

#[async_trait]
impl CaseStore for LibSqlBackend {
    async fn create_case(&self, input: &CreateCaseParams) -> Result<CaseRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        let metadata = serialize_metadata(&input.metadata)?;

        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO cases \
             (id, workspace_id, number, detected_cnj, status, metadata, processo_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?7)",
            params![
                id.to_string(),
                input.workspace_id.as_str(),
                input.number.trim(),
                opt_text(input.detected_cnj.as_deref()),
                input.status.as_str(),
                metadata,
                now,
            ],
        )
        .await?;

        self.get_case(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to resolve inserted case".to_string()))
    }

    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = ?1 LIMIT 1"),
                params![case_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.as_ref().map(row_to_case_record).transpose()
    }

    async fn find_case_by_cnj(
        &self,
        cnj: &str,
        status: CaseStatus,
    ) -> Result<Option<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases \
                     WHERE detected_cnj = ?1 AND status = ?2 \
                     ORDER BY created_at ASC, id ASC LIMIT 1"
                ),
                params![cnj, status.as_str()],
            )
            .await?
            .next()
            .await?;
        row.as_ref().map(row_to_case_record).transpose()
    }

    async fn list_cases_by_status(
        &self,
        status: CaseStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases \
                     WHERE status = ?1 AND (?2 IS NULL OR updated_at < ?2) \
                     ORDER BY created_at ASC, id ASC"
                ),
                params![
                    status.as_str(),
                    opt_text_owned(updated_before.as_ref().map(fmt_ts)),
                ],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_case_record(&row)?);
        }
        Ok(out)
    }

    async fn compare_and_set_case_status(
        &self,
        case_id: Uuid,
        update: &CaseStatusUpdate,
    ) -> Result<Option<CaseRecord>, DatabaseError> {
        let metadata = serialize_metadata(&update.metadata)?;
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE cases SET \
                    status = ?1, \
                    metadata = ?2, \
                    processo_id = COALESCE(?3, processo_id), \
                    detected_cnj = COALESCE(?4, detected_cnj), \
                    updated_at = ?5 \
                 WHERE id = ?6 AND status = ?7",
                params![
                    update.to.as_str(),
                    metadata,
                    opt_text_owned(update.processo_id.map(|id| id.to_string())),
                    opt_text_owned(update.detected_cnj.clone()),
                    fmt_ts(&Utc::now()),
                    case_id.to_string(),
                    update.from.as_str(),
                ],
            )
            .await?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_case(case_id).await
    }
}

#[async_trait]
impl WorkspaceStore for LibSqlBackend {
    async fn increment_process_count(&self, workspace_id: &str) -> Result<i64, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "INSERT INTO workspaces (id, process_count, updated_at) VALUES (?1, 1, ?2) \
                 ON CONFLICT (id) DO UPDATE SET \
                    process_count = process_count + 1, \
                    updated_at = excluded.updated_at \
                 RETURNING process_count",
                params![workspace_id, fmt_ts(&Utc::now())],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("process count upsert returned no row".to_string()))?;
        Ok(get_i64(&row, 0))
    }

    async fn get_process_count(&self, workspace_id: &str) -> Result<i64, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT process_count FROM workspaces WHERE id = ?1",
                params![workspace_id],
            )
            .await?
            .next()
            .await?;
        Ok(row.map(|row| get_i64(&row, 0)).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::libsql::tests::setup_backend;

    const CNJ: &str = "1234567-12.2023.8.09.0001";

    fn params_for(status: CaseStatus) -> CreateCaseParams {
        CreateCaseParams {
            workspace_id: "ws-1".to_string(),
            number: format!(" {CNJ} "),
            detected_cnj: Some(CNJ.to_string()),
            status,
            metadata: CaseMetadata::default(),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_case() {
        let fixture = setup_backend().await;
        let db = &fixture.backend;

        let created = db
            .create_case(&params_for(CaseStatus::Unassigned))
            .await
            .expect("create");
        assert_eq!(created.number, CNJ);
        assert_eq!(created.status, CaseStatus::Unassigned);
        assert!(created.metadata.can_retry);

        let fetched = db.get_case(created.id).await.expect("get").expect("exists");
        assert_eq!(fetched, created);
        assert!(db.get_case(Uuid::new_v4()).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_status() {
        let fixture = setup_backend().await;
        let db = &fixture.backend;
        let case = db
            .create_case(&params_for(CaseStatus::Onboarding))
            .await
            .expect("create");
        let processo_id = Uuid::new_v4();

        let update = CaseStatusUpdate {
            from: CaseStatus::Onboarding,
            to: CaseStatus::Active,
            metadata: case.metadata.clone(),
            processo_id: Some(processo_id),
            detected_cnj: None,
        };
        let won = db
            .compare_and_set_case_status(case.id, &update)
            .await
            .expect("cas")
            .expect("first write wins");
        assert_eq!(won.status, CaseStatus::Active);
        assert_eq!(won.processo_id, Some(processo_id));

        let lost = db
            .compare_and_set_case_status(case.id, &update)
            .await
            .expect("cas");
        assert!(lost.is_none());
    }

    #[tokio::test]
    async fn compare_and_set_keeps_processo_link_when_absent() {
        let fixture = setup_backend().await;
        let db = &fixture.backend;
        let case = db
            .create_case(&params_for(CaseStatus::Onboarding))
            .await
            .expect("create");
        let processo_id = Uuid::new_v4();
        db.compare_and_set_case_status(
            case.id,
            &CaseStatusUpdate {
                from: CaseStatus::Onboarding,
                to: CaseStatus::Active,
                metadata: case.metadata.clone(),
                processo_id: Some(processo_id),
                detected_cnj: None,
            },
        )
        .await
        .expect("cas");

        let closed = db
            .compare_and_set_case_status(
                case.id,
                &CaseStatusUpdate {
                    from: CaseStatus::Active,
                    to: CaseStatus::Closed,
                    metadata: case.metadata.with_error("closed by user"),
                    processo_id: None,
                    detected_cnj: None,
                },
            )
            .await
            .expect("cas")
            .expect("applied");
        assert_eq!(closed.processo_id, Some(processo_id));
        assert_eq!(closed.metadata.last_error.as_deref(), Some("closed by user"));
    }

    #[tokio::test]
    async fn find_and_list_by_status() {
        let fixture = setup_backend().await;
        let db = &fixture.backend;
        let first = db
            .create_case(&params_for(CaseStatus::Onboarding))
            .await
            .expect("create");
        db.create_case(&params_for(CaseStatus::Onboarding))
            .await
            .expect("create");
        db.create_case(&params_for(CaseStatus::Active))
            .await
            .expect("create");

        let found = db
            .find_case_by_cnj(CNJ, CaseStatus::Onboarding)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(found.id, first.id);

        let onboarding = db
            .list_cases_by_status(CaseStatus::Onboarding, None)
            .await
            .expect("list");
        assert_eq!(onboarding.len(), 2);

        let stale = db
            .list_cases_by_status(
                CaseStatus::Onboarding,
                Some(first.created_at - chrono::Duration::seconds(1)),
            )
            .await
            .expect("list");
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn process_count_increments_per_workspace() {
        let fixture = setup_backend().await;
        let db = &fixture.backend;

        assert_eq!(db.get_process_count("ws-1").await.expect("count"), 0);
        assert_eq!(db.increment_process_count("ws-1").await.expect("inc"), 1);
        assert_eq!(db.increment_process_count("ws-1").await.expect("inc"), 2);
        assert_eq!(db.increment_process_count("ws-2").await.expect("inc"), 1);
        assert_eq!(db.get_process_count("ws-1").await.expect("count"), 2);
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use granta_core::domain::escalation::{
    EscalationId, EscalationLevel, EscalationRecord, EscalationResolution,
};
use granta_core::domain::practitioner::UserId;
use granta_core::domain::request::RequestId;
use granta_core::errors::StoreError;
use granta_core::ports::EscalationStore;

use super::{backend, decode, parse_timestamp};
use crate::DbPool;

pub struct SqlEscalationStore {
    pool: DbPool,
}

impl SqlEscalationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_level(raw: &str) -> Result<EscalationLevel, StoreError> {
    match raw {
        "none" => Ok(EscalationLevel::None),
        "reminder" => Ok(EscalationLevel::Reminder),
        "manager" => Ok(EscalationLevel::Manager),
        "hr" => Ok(EscalationLevel::Hr),
        other => Err(decode(format!("unknown escalation level `{other}`"))),
    }
}

fn level_as_str(level: EscalationLevel) -> &'static str {
    match level {
        EscalationLevel::None => "none",
        EscalationLevel::Reminder => "reminder",
        EscalationLevel::Manager => "manager",
        EscalationLevel::Hr => "hr",
    }
}

fn parse_resolution(raw: &str) -> Result<EscalationResolution, StoreError> {
    match raw {
        "approved" => Ok(EscalationResolution::Approved),
        "rejected" => Ok(EscalationResolution::Rejected),
        "delegated" => Ok(EscalationResolution::Delegated),
        "expired" => Ok(EscalationResolution::Expired),
        other => Err(decode(format!("unknown escalation resolution `{other}`"))),
    }
}

fn resolution_as_str(resolution: EscalationResolution) -> &'static str {
    match resolution {
        EscalationResolution::Approved => "approved",
        EscalationResolution::Rejected => "rejected",
        EscalationResolution::Delegated => "delegated",
        EscalationResolution::Expired => "expired",
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<EscalationRecord, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode(e.to_string()))?;
    let request_id: String =
        row.try_get("request_id").map_err(|e| decode(e.to_string()))?;
    let approver_id: String =
        row.try_get("approver_id").map_err(|e| decode(e.to_string()))?;
    let level: String = row.try_get("level").map_err(|e| decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| decode(e.to_string()))?;
    let notified_at: String =
        row.try_get("notified_at").map_err(|e| decode(e.to_string()))?;
    let resolved_at: Option<String> =
        row.try_get("resolved_at").map_err(|e| decode(e.to_string()))?;
    let resolution: Option<String> =
        row.try_get("resolution").map_err(|e| decode(e.to_string()))?;

    Ok(EscalationRecord {
        id: EscalationId(id),
        request_id: RequestId(request_id),
        approver_id: UserId(approver_id),
        level: parse_level(&level)?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        notified_at: parse_timestamp(&notified_at, "notified_at")?,
        resolved_at: resolved_at
            .map(|raw| parse_timestamp(&raw, "resolved_at"))
            .transpose()?,
        resolution: resolution.as_deref().map(parse_resolution).transpose()?,
    })
}

const SELECT_COLUMNS: &str = "SELECT id, request_id, approver_id, level, created_at,
        notified_at, resolved_at, resolution
 FROM escalation_record";

#[async_trait]
impl EscalationStore for SqlEscalationStore {
    async fn insert(&self, record: EscalationRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO escalation_record (id, request_id, approver_id, level,
                                            created_at, notified_at, resolved_at, resolution)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.request_id.0)
        .bind(&record.approver_id.0)
        .bind(level_as_str(record.level))
        .bind(record.created_at.to_rfc3339())
        .bind(record.notified_at.to_rfc3339())
        .bind(record.resolved_at.map(|dt| dt.to_rfc3339()))
        .bind(record.resolution.map(resolution_as_str))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn find_unresolved(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
        level: EscalationLevel,
    ) -> Result<Option<EscalationRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE request_id = ? AND approver_id = ? AND level = ? AND resolved_at IS NULL"
        ))
        .bind(&request_id.0)
        .bind(&approver_id.0)
        .bind(level_as_str(level))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn latest_unresolved(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
    ) -> Result<Option<EscalationRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE request_id = ? AND approver_id = ? AND resolved_at IS NULL
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(&request_id.0)
        .bind(&approver_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn unresolved_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<EscalationRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE request_id = ? AND resolved_at IS NULL
             ORDER BY created_at ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn mark_resolved(
        &self,
        id: &EscalationId,
        resolution: EscalationResolution,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE escalation_record SET resolved_at = ?, resolution = ?
             WHERE id = ? AND resolved_at IS NULL",
        )
        .bind(resolved_at.to_rfc3339())
        .bind(resolution_as_str(resolution))
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn records_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EscalationRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE created_at >= ? AND created_at < ?
             ORDER BY created_at ASC"
        ))
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_record).collect()
    }
}

use async_trait::async_trait;
use sqlx::Row;

use granta_core::domain::approval::{ApprovalLevel, ApprovalRecord, ApprovalStatus};
use granta_core::domain::practitioner::UserId;
use granta_core::domain::request::RequestId;
use granta_core::errors::StoreError;
use granta_core::ports::ApprovalStore;

use super::{backend, decode, parse_timestamp};
use crate::DbPool;

pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_level(raw: &str) -> Result<ApprovalLevel, StoreError> {
    match raw {
        "section_head" => Ok(ApprovalLevel::SectionHead),
        "department_head" => Ok(ApprovalLevel::DepartmentHead),
        "committee" => Ok(ApprovalLevel::Committee),
        "medical_director" => Ok(ApprovalLevel::MedicalDirector),
        other => Err(decode(format!("unknown approval level `{other}`"))),
    }
}

pub(crate) fn level_as_str(level: ApprovalLevel) -> &'static str {
    match level {
        ApprovalLevel::SectionHead => "section_head",
        ApprovalLevel::DepartmentHead => "department_head",
        ApprovalLevel::Committee => "committee",
        ApprovalLevel::MedicalDirector => "medical_director",
    }
}

fn parse_status(raw: &str) -> Result<ApprovalStatus, StoreError> {
    match raw {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        other => Err(decode(format!("unknown approval status `{other}`"))),
    }
}

fn status_as_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRecord, StoreError> {
    let request_id: String =
        row.try_get("request_id").map_err(|e| decode(e.to_string()))?;
    let approver_id: String =
        row.try_get("approver_id").map_err(|e| decode(e.to_string()))?;
    let level: String = row.try_get("level").map_err(|e| decode(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let comments: Option<String> =
        row.try_get("comments").map_err(|e| decode(e.to_string()))?;
    let decided_at: String =
        row.try_get("decided_at").map_err(|e| decode(e.to_string()))?;

    Ok(ApprovalRecord {
        request_id: RequestId(request_id),
        approver_id: UserId(approver_id),
        level: parse_level(&level)?,
        status: parse_status(&status)?,
        comments,
        decided_at: parse_timestamp(&decided_at, "decided_at")?,
    })
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn records_for_request(
        &self,
        id: &RequestId,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT request_id, approver_id, level, status, comments, decided_at
             FROM approval_record WHERE request_id = ? ORDER BY decided_at ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn upsert(&self, record: ApprovalRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approval_record (request_id, approver_id, level, status,
                                          comments, decided_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(request_id, approver_id, level) DO UPDATE SET
                 status = excluded.status,
                 comments = excluded.comments,
                 decided_at = excluded.decided_at",
        )
        .bind(&record.request_id.0)
        .bind(&record.approver_id.0)
        .bind(level_as_str(record.level))
        .bind(status_as_str(record.status))
        .bind(&record.comments)
        .bind(record.decided_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use granta_core::domain::escalation::PendingApproval;
use granta_core::domain::practitioner::{Specialty, UserId};
use granta_core::domain::request::{
    Privilege, PrivilegeRequest, PrivilegeType, RequestId, RequestStatus,
};
use granta_core::errors::StoreError;
use granta_core::ports::RequestStore;

use super::directory::row_to_practitioner;
use super::{backend, decode, parse_timestamp};
use crate::DbPool;

pub struct SqlRequestStore {
    pool: DbPool,
}

impl SqlRequestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a request and its privilege lines. Called by the
    /// portal at submission time, and by test setup.
    pub async fn save(&self, request: &PrivilegeRequest) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO privilege_request (id, applicant_id, privilege_type, status,
                                            submitted_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 applicant_id = excluded.applicant_id,
                 privilege_type = excluded.privilege_type,
                 status = excluded.status,
                 submitted_at = excluded.submitted_at,
                 completed_at = excluded.completed_at",
        )
        .bind(&request.id.0)
        .bind(&request.applicant_id.0)
        .bind(privilege_type_as_str(request.privilege_type))
        .bind(request_status_as_str(request.status))
        .bind(request.submitted_at.to_rfc3339())
        .bind(request.completed_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM request_privilege WHERE request_id = ?")
            .bind(&request.id.0)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for (position, privilege) in request.privileges.iter().enumerate() {
            sqlx::query(
                "INSERT INTO request_privilege (request_id, privilege_id, name, category,
                                                required_specialty, position)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&request.id.0)
            .bind(&privilege.id)
            .bind(&privilege.name)
            .bind(privilege_type_as_str(privilege.category))
            .bind(privilege.required_specialty.as_ref().map(|s| s.0.as_str()))
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)
    }

    /// Record that an approver's decision is awaited for a request.
    pub async fn mark_pending(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
        pending_since: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO pending_approval (request_id, approver_id, pending_since)
             VALUES (?, ?, ?)
             ON CONFLICT(request_id, approver_id) DO UPDATE SET
                 pending_since = excluded.pending_since",
        )
        .bind(&request_id.0)
        .bind(&approver_id.0)
        .bind(pending_since.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    pub async fn clear_pending(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_approval WHERE request_id = ? AND approver_id = ?")
            .bind(&request_id.0)
            .bind(&approver_id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn privileges_for(&self, request_id: &str) -> Result<Vec<Privilege>, StoreError> {
        let rows = sqlx::query(
            "SELECT privilege_id, name, category, required_specialty
             FROM request_privilege WHERE request_id = ? ORDER BY position ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_privilege).collect()
    }
}

fn parse_privilege_type(raw: &str) -> Result<PrivilegeType, StoreError> {
    match raw {
        "core" => Ok(PrivilegeType::Core),
        "non_core" => Ok(PrivilegeType::NonCore),
        "extra" => Ok(PrivilegeType::Extra),
        other => Err(decode(format!("unknown privilege type `{other}`"))),
    }
}

pub(crate) fn privilege_type_as_str(privilege_type: PrivilegeType) -> &'static str {
    match privilege_type {
        PrivilegeType::Core => "core",
        PrivilegeType::NonCore => "non_core",
        PrivilegeType::Extra => "extra",
    }
}

fn parse_request_status(raw: &str) -> Result<RequestStatus, StoreError> {
    match raw {
        "draft" => Ok(RequestStatus::Draft),
        "pending" => Ok(RequestStatus::Pending),
        "in_review" => Ok(RequestStatus::InReview),
        "approved" => Ok(RequestStatus::Approved),
        "rejected" => Ok(RequestStatus::Rejected),
        "modifications_required" => Ok(RequestStatus::ModificationsRequired),
        "cancelled" => Ok(RequestStatus::Cancelled),
        other => Err(decode(format!("unknown request status `{other}`"))),
    }
}

pub(crate) fn request_status_as_str(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Draft => "draft",
        RequestStatus::Pending => "pending",
        RequestStatus::InReview => "in_review",
        RequestStatus::Approved => "approved",
        RequestStatus::Rejected => "rejected",
        RequestStatus::ModificationsRequired => "modifications_required",
        RequestStatus::Cancelled => "cancelled",
    }
}

fn row_to_privilege(row: &sqlx::sqlite::SqliteRow) -> Result<Privilege, StoreError> {
    let id: String =
        row.try_get("privilege_id").map_err(|e| decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| decode(e.to_string()))?;
    let category: String = row.try_get("category").map_err(|e| decode(e.to_string()))?;
    let required_specialty: Option<String> =
        row.try_get("required_specialty").map_err(|e| decode(e.to_string()))?;

    Ok(Privilege {
        id,
        name,
        category: parse_privilege_type(&category)?,
        required_specialty: required_specialty.map(Specialty),
    })
}

fn row_to_request_header(
    row: &sqlx::sqlite::SqliteRow,
    privileges: Vec<Privilege>,
) -> Result<PrivilegeRequest, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode(e.to_string()))?;
    let applicant_id: String =
        row.try_get("applicant_id").map_err(|e| decode(e.to_string()))?;
    let privilege_type: String =
        row.try_get("privilege_type").map_err(|e| decode(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let submitted_at: String =
        row.try_get("submitted_at").map_err(|e| decode(e.to_string()))?;
    let completed_at: Option<String> =
        row.try_get("completed_at").map_err(|e| decode(e.to_string()))?;

    Ok(PrivilegeRequest {
        id: RequestId(id),
        applicant_id: UserId(applicant_id),
        privilege_type: parse_privilege_type(&privilege_type)?,
        status: parse_request_status(&status)?,
        privileges,
        submitted_at: parse_timestamp(&submitted_at, "submitted_at")?,
        completed_at: completed_at
            .map(|raw| parse_timestamp(&raw, "completed_at"))
            .transpose()?,
    })
}

#[async_trait]
impl RequestStore for SqlRequestStore {
    async fn find_request(
        &self,
        id: &RequestId,
    ) -> Result<Option<PrivilegeRequest>, StoreError> {
        let row = sqlx::query(
            "SELECT id, applicant_id, privilege_type, status, submitted_at, completed_at
             FROM privilege_request WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(ref row) => {
                let privileges = self.privileges_for(&id.0).await?;
                Ok(Some(row_to_request_header(row, privileges)?))
            }
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE privilege_request SET status = ?, completed_at = ? WHERE id = ?",
        )
        .bind(request_status_as_str(status))
        .bind(completed_at.map(|dt| dt.to_rfc3339()))
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn pending_approvals(&self) -> Result<Vec<PendingApproval>, StoreError> {
        let rows = sqlx::query(
            "SELECT pa.request_id, pa.pending_since,
                    p.id, p.display_name, p.practitioner_type, p.primary_specialty,
                    p.additional_specialties, p.can_approve, p.committee_member,
                    p.medical_director, p.manager_id
             FROM pending_approval pa
             JOIN practitioner p ON p.id = pa.approver_id
             ORDER BY pa.pending_since ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in &rows {
            let request_id: String =
                row.try_get("request_id").map_err(|e| decode(e.to_string()))?;
            let pending_since: String =
                row.try_get("pending_since").map_err(|e| decode(e.to_string()))?;
            let request = self
                .find_request(&RequestId(request_id.clone()))
                .await?
                .ok_or_else(|| {
                    decode(format!("pending approval references missing request `{request_id}`"))
                })?;

            pending.push(PendingApproval {
                request,
                approver: row_to_practitioner(row)?,
                pending_since: parse_timestamp(&pending_since, "pending_since")?,
            });
        }
        Ok(pending)
    }
}

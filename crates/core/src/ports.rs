//! Collaborator contracts the engines are constructed with. The portal and
//! the worker binary supply real implementations (see `granta-db`); the
//! in-memory versions in [`crate::memory`] back the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::approval::ApprovalRecord;
use crate::domain::escalation::{
    EscalationId, EscalationLevel, EscalationRecord, EscalationResolution, PendingApproval,
};
use crate::domain::practitioner::{Practitioner, Specialty, UserId};
use crate::domain::request::{PrivilegeRequest, RequestId, RequestStatus};
use crate::errors::StoreError;

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn find_request(&self, id: &RequestId)
        -> Result<Option<PrivilegeRequest>, StoreError>;

    async fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// All approval slots currently awaiting a decision, with how long each
    /// has been pending. Externally maintained projection; read-only here.
    async fn pending_approvals(&self) -> Result<Vec<PendingApproval>, StoreError>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn records_for_request(
        &self,
        id: &RequestId,
    ) -> Result<Vec<ApprovalRecord>, StoreError>;

    /// Insert or replace the record keyed by (request, approver, level).
    /// The upsert is the atomic boundary for concurrent approvers.
    async fn upsert(&self, record: ApprovalRecord) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<Practitioner>, StoreError>;

    /// Consultants with approval capability, ordered with practitioners
    /// matching `preferred_specialty` first.
    async fn consultants(
        &self,
        preferred_specialty: Option<&Specialty>,
    ) -> Result<Vec<Practitioner>, StoreError>;

    async fn committee_members(&self) -> Result<Vec<Practitioner>, StoreError>;

    async fn medical_directors(&self) -> Result<Vec<Practitioner>, StoreError>;

    async fn manager_of(&self, id: &UserId) -> Result<Option<Practitioner>, StoreError>;
}

#[async_trait]
pub trait EscalationStore: Send + Sync {
    async fn insert(&self, record: EscalationRecord) -> Result<(), StoreError>;

    async fn find_unresolved(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
        level: EscalationLevel,
    ) -> Result<Option<EscalationRecord>, StoreError>;

    /// Most recently created unresolved record for the pair, any level.
    async fn latest_unresolved(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
    ) -> Result<Option<EscalationRecord>, StoreError>;

    async fn unresolved_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<EscalationRecord>, StoreError>;

    async fn mark_resolved(
        &self,
        id: &EscalationId,
        resolution: EscalationResolution,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Records created in `[from, to)`, for reporting.
    async fn records_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EscalationRecord>, StoreError>;
}

/// Outbound notification about an escalated approval. Content rendering and
/// transport belong to the dispatcher, not the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscalationNotice {
    pub request: PrivilegeRequest,
    /// Who receives the notification at this level.
    pub recipient: Practitioner,
    /// Whose pending approval triggered it.
    pub approver: Practitioner,
    pub level: EscalationLevel,
    pub pending_since: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn delivered() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Retry and backoff are the dispatcher's concern; the engine treats a
    /// failed outcome as "nothing sent" and lets the next sweep re-attempt.
    async fn send(&self, notice: EscalationNotice) -> DispatchOutcome;
}

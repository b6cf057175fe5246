//! In-memory implementations of the collaborator ports. Used by the engine
//! tests and for local wiring without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::approval::ApprovalRecord;
use crate::domain::escalation::{
    EscalationId, EscalationLevel, EscalationRecord, EscalationResolution, PendingApproval,
};
use crate::domain::practitioner::{Practitioner, Specialty, UserId};
use crate::domain::request::{PrivilegeRequest, RequestId, RequestStatus};
use crate::errors::StoreError;
use crate::ports::{
    ApprovalStore, Directory, DispatchOutcome, EscalationNotice, EscalationStore,
    NotificationDispatcher, RequestStore,
};

#[derive(Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<String, PrivilegeRequest>>,
    pending: RwLock<Vec<PendingApproval>>,
}

impl InMemoryRequestStore {
    pub async fn insert(&self, request: PrivilegeRequest) {
        self.requests.write().await.insert(request.id.0.clone(), request);
    }

    pub async fn insert_pending(&self, pending: PendingApproval) {
        self.pending.write().await.push(pending);
    }

    pub async fn get(&self, id: &RequestId) -> Option<PrivilegeRequest> {
        self.requests.read().await.get(&id.0).cloned()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn find_request(
        &self,
        id: &RequestId,
    ) -> Result<Option<PrivilegeRequest>, StoreError> {
        Ok(self.requests.read().await.get(&id.0).cloned())
    }

    async fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::Backend(format!("unknown request `{id}`")))?;
        request.status = status;
        request.completed_at = completed_at;
        Ok(())
    }

    async fn pending_approvals(&self) -> Result<Vec<PendingApproval>, StoreError> {
        Ok(self.pending.read().await.clone())
    }
}

#[derive(Default)]
pub struct InMemoryApprovalStore {
    records: RwLock<Vec<ApprovalRecord>>,
}

impl InMemoryApprovalStore {
    pub async fn all(&self) -> Vec<ApprovalRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn records_for_request(
        &self,
        id: &RequestId,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.request_id == *id)
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: ApprovalRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|existing| {
            existing.request_id == record.request_id
                && existing.approver_id == record.approver_id
                && existing.level == record.level
        }) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, Practitioner>>,
}

impl InMemoryDirectory {
    pub fn with_users(users: Vec<Practitioner>) -> Self {
        let users = users.into_iter().map(|user| (user.id.0.clone(), user)).collect();
        Self { users: RwLock::new(users) }
    }

    pub async fn insert(&self, user: Practitioner) {
        self.users.write().await.insert(user.id.0.clone(), user);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<Practitioner>, StoreError> {
        Ok(self.users.read().await.get(&id.0).cloned())
    }

    async fn consultants(
        &self,
        preferred_specialty: Option<&Specialty>,
    ) -> Result<Vec<Practitioner>, StoreError> {
        let mut consultants: Vec<Practitioner> = self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.is_consultant() && user.can_approve)
            .cloned()
            .collect();
        consultants.sort_by(|left, right| {
            let left_match = preferred_specialty.is_some_and(|s| left.has_specialty(s));
            let right_match = preferred_specialty.is_some_and(|s| right.has_specialty(s));
            right_match.cmp(&left_match).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(consultants)
    }

    async fn committee_members(&self) -> Result<Vec<Practitioner>, StoreError> {
        let mut members: Vec<Practitioner> = self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.committee_member && user.can_approve)
            .cloned()
            .collect();
        members.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(members)
    }

    async fn medical_directors(&self) -> Result<Vec<Practitioner>, StoreError> {
        let mut directors: Vec<Practitioner> = self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.medical_director && user.can_approve)
            .cloned()
            .collect();
        directors.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(directors)
    }

    async fn manager_of(&self, id: &UserId) -> Result<Option<Practitioner>, StoreError> {
        let users = self.users.read().await;
        let Some(user) = users.get(&id.0) else {
            return Ok(None);
        };
        let Some(manager_id) = &user.manager_id else {
            return Ok(None);
        };
        Ok(users.get(&manager_id.0).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryEscalationStore {
    records: RwLock<Vec<EscalationRecord>>,
}

impl InMemoryEscalationStore {
    pub async fn all(&self) -> Vec<EscalationRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl EscalationStore for InMemoryEscalationStore {
    async fn insert(&self, record: EscalationRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn find_unresolved(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
        level: EscalationLevel,
    ) -> Result<Option<EscalationRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|record| {
                record.request_id == *request_id
                    && record.approver_id == *approver_id
                    && record.level == level
                    && !record.is_resolved()
            })
            .cloned())
    }

    async fn latest_unresolved(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
    ) -> Result<Option<EscalationRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|record| {
                record.request_id == *request_id
                    && record.approver_id == *approver_id
                    && !record.is_resolved()
            })
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn unresolved_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<EscalationRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.request_id == *request_id && !record.is_resolved())
            .cloned()
            .collect())
    }

    async fn mark_resolved(
        &self,
        id: &EscalationId,
        resolution: EscalationResolution,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if let Some(record) =
            records.iter_mut().find(|record| record.id == *id && !record.is_resolved())
        {
            record.resolution = Some(resolution);
            record.resolved_at = Some(resolved_at);
        }
        Ok(())
    }

    async fn records_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EscalationRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.created_at >= from && record.created_at < to)
            .cloned()
            .collect())
    }
}

/// Test dispatcher that captures every notice and can be told to fail.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: RwLock<Vec<EscalationNotice>>,
    failure: RwLock<Option<String>>,
}

impl RecordingDispatcher {
    pub fn failing(error: impl Into<String>) -> Self {
        Self { sent: RwLock::default(), failure: RwLock::new(Some(error.into())) }
    }

    pub async fn set_failure(&self, error: Option<String>) {
        *self.failure.write().await = error;
    }

    pub async fn notices(&self) -> Vec<EscalationNotice> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, notice: EscalationNotice) -> DispatchOutcome {
        if let Some(error) = self.failure.read().await.clone() {
            return DispatchOutcome::failed(error);
        }
        self.sent.write().await.push(notice);
        DispatchOutcome::delivered()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::practitioner::{Practitioner, UserId};
use crate::domain::request::{PrivilegeRequest, RequestId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscalationId(pub String);

impl std::fmt::Display for EscalationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Severity rung for an unresolved approval, ordered by elapsed pending
/// time. The derived `Ord` follows declaration order: None < Reminder <
/// Manager < Hr.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    None,
    Reminder,
    Manager,
    Hr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationResolution {
    Approved,
    Rejected,
    Delegated,
    Expired,
}

/// One sent escalation notification. Created only after a successful
/// dispatch; an unresolved record for (request, approver, level) suppresses
/// re-notification at that level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: EscalationId,
    pub request_id: RequestId,
    pub approver_id: UserId,
    pub level: EscalationLevel,
    pub created_at: DateTime<Utc>,
    pub notified_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<EscalationResolution>,
}

impl EscalationRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Read-only projection of one approval slot still awaiting a decision.
/// Supplied by the store; the engine never writes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub request: PrivilegeRequest,
    pub approver: Practitioner,
    pub pending_since: DateTime<Utc>,
}

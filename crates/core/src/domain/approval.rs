use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::practitioner::UserId;
use crate::domain::request::RequestId;

/// Nominal level an approval decision is recorded at. Consultant decisions
/// are solicited at `SectionHead`; any approved consultant record below
/// `MedicalDirector` counts toward the consultant total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    SectionHead,
    DepartmentHead,
    Committee,
    MedicalDirector,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// One recorded approval decision, keyed by (request, approver, level) so
/// that multiple consultants acting at the same nominal level never collide
/// on a single row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub request_id: RequestId,
    pub approver_id: UserId,
    pub level: ApprovalLevel,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// The approval requirement resolved for a request: how many consultant
/// approvals it needs and which review gates apply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequirement {
    pub required_consultants: u32,
    pub requires_committee_review: bool,
    pub requires_director_approval: bool,
    pub auto_approve: bool,
    pub description: String,
}

impl ApprovalRequirement {
    /// The fallback applied when no rule matches: deliberately the most
    /// restrictive requirement so a configuration gap never under-requires.
    pub fn most_restrictive() -> Self {
        Self {
            required_consultants: 2,
            requires_committee_review: true,
            requires_director_approval: true,
            auto_approve: false,
            description: "fallback: no matching approval rule".to_string(),
        }
    }
}

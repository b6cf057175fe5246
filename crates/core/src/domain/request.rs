use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::practitioner::{Specialty, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification of a privilege (and, at request level, of the request as a
/// whole). Only `Core` requests are eligible for the auto-approval fast path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeType {
    Core,
    NonCore,
    Extra,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Pending,
    InReview,
    Approved,
    Rejected,
    ModificationsRequired,
    Cancelled,
}

impl RequestStatus {
    /// Terminal statuses admit no further decisions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

/// A single requestable privilege. Immutable reference data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub id: String,
    pub name: String,
    pub category: PrivilegeType,
    pub required_specialty: Option<Specialty>,
}

/// A privileging request as submitted by an applicant. Status is mutated only
/// by the transition processor and the auto-approval rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeRequest {
    pub id: RequestId,
    pub applicant_id: UserId,
    pub privilege_type: PrivilegeType,
    pub status: RequestStatus,
    pub privileges: Vec<Privilege>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

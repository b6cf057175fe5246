//! Decides whether a user may record an approval decision right now. The
//! transition processor re-runs this at the moment of recording; results are
//! never cached because concurrent approvals change eligibility.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalLevel, ApprovalStatus};
use crate::domain::practitioner::UserId;
use crate::domain::request::{RequestId, RequestStatus};
use crate::errors::StoreError;
use crate::ports::{ApprovalStore, Directory, RequestStore};
use crate::progress::ProgressTracker;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthorizationDenial {
    UnknownUser { user_id: UserId },
    NoApprovalCapability,
    UnknownRequest { request_id: RequestId },
    RequestNotActionable { status: RequestStatus },
    SelfApproval,
    AlreadyApproved,
    NotCurrentlyRequired,
}

impl AuthorizationDenial {
    fn reason(&self) -> String {
        match self {
            Self::UnknownUser { user_id } => format!("unknown user `{user_id}`"),
            Self::NoApprovalCapability => {
                "user does not have approval capability".to_string()
            }
            Self::UnknownRequest { request_id } => {
                format!("unknown request `{request_id}`")
            }
            Self::RequestNotActionable { status } => {
                format!("request is not awaiting approval (status {status:?})")
            }
            Self::SelfApproval => "cannot approve own request".to_string(),
            Self::AlreadyApproved => {
                "user has already approved this request".to_string()
            }
            Self::NotCurrentlyRequired => {
                "user's approval is not currently required".to_string()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAuthorization {
    pub allowed: bool,
    pub reason: String,
    pub level: Option<ApprovalLevel>,
    pub denial: Option<AuthorizationDenial>,
}

impl ApprovalAuthorization {
    fn allow(level: ApprovalLevel, reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into(), level: Some(level), denial: None }
    }

    fn deny(denial: AuthorizationDenial) -> Self {
        Self { allowed: false, reason: denial.reason(), level: None, denial: Some(denial) }
    }
}

pub struct AuthorizationGuard {
    requests: Arc<dyn RequestStore>,
    approvals: Arc<dyn ApprovalStore>,
    directory: Arc<dyn Directory>,
    tracker: Arc<ProgressTracker>,
}

impl AuthorizationGuard {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        approvals: Arc<dyn ApprovalStore>,
        directory: Arc<dyn Directory>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        Self { requests, approvals, directory, tracker }
    }

    pub async fn can_approve(
        &self,
        user_id: &UserId,
        request_id: &RequestId,
    ) -> Result<ApprovalAuthorization, StoreError> {
        let Some(user) = self.directory.find_user(user_id).await? else {
            return Ok(ApprovalAuthorization::deny(AuthorizationDenial::UnknownUser {
                user_id: user_id.clone(),
            }));
        };
        if !user.can_approve {
            return Ok(ApprovalAuthorization::deny(
                AuthorizationDenial::NoApprovalCapability,
            ));
        }

        let Some(request) = self.requests.find_request(request_id).await? else {
            return Ok(ApprovalAuthorization::deny(AuthorizationDenial::UnknownRequest {
                request_id: request_id.clone(),
            }));
        };
        if request.status.is_terminal() {
            return Ok(ApprovalAuthorization::deny(
                AuthorizationDenial::RequestNotActionable { status: request.status },
            ));
        }
        if request.applicant_id == *user_id {
            return Ok(ApprovalAuthorization::deny(AuthorizationDenial::SelfApproval));
        }

        let records = self.approvals.records_for_request(request_id).await?;
        let already_approved = records.iter().any(|record| {
            record.approver_id == *user_id && record.status == ApprovalStatus::Approved
        });
        if already_approved {
            return Ok(ApprovalAuthorization::deny(AuthorizationDenial::AlreadyApproved));
        }

        let applicant = self
            .directory
            .find_user(&request.applicant_id)
            .await?
            .ok_or_else(|| {
                StoreError::Backend(format!(
                    "applicant `{}` missing from directory",
                    request.applicant_id
                ))
            })?;
        let progress = self.tracker.progress(&request, &applicant, &records).await?;

        // Director override: a medical director may act whenever director
        // approval is outstanding, regardless of the pending enumeration.
        if user.medical_director
            && progress.director_required
            && !progress.director_approved
        {
            return Ok(ApprovalAuthorization::allow(
                ApprovalLevel::MedicalDirector,
                format!("medical director approval is outstanding for `{request_id}`"),
            ));
        }

        match progress
            .pending_approvers
            .iter()
            .find(|pending| pending.user.id == *user_id)
        {
            Some(pending) => Ok(ApprovalAuthorization::allow(
                pending.level,
                format!(
                    "`{user_id}` is an eligible {:?} approver for `{request_id}`",
                    pending.level
                ),
            )),
            None => Ok(ApprovalAuthorization::deny(
                AuthorizationDenial::NotCurrentlyRequired,
            )),
        }
    }
}

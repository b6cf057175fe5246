//! Approval progress: how much of the resolved requirement a request has
//! satisfied, what the next required level is, and who may act on it.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalLevel, ApprovalRecord, ApprovalStatus};
use crate::domain::practitioner::{Practitioner, Specialty};
use crate::domain::request::PrivilegeRequest;
use crate::errors::StoreError;
use crate::ports::Directory;
use crate::rules::RequirementResolver;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApprover {
    pub user: Practitioner,
    pub level: ApprovalLevel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalProgress {
    pub consultant_approvals: u32,
    pub required_consultants: u32,
    pub committee_required: bool,
    pub committee_approved: bool,
    pub director_required: bool,
    pub director_approved: bool,
    pub is_complete: bool,
    pub next_level: Option<ApprovalLevel>,
    pub pending_approvers: Vec<PendingApprover>,
}

impl ApprovalProgress {
    pub fn outstanding_consultants(&self) -> u32 {
        self.required_consultants.saturating_sub(self.consultant_approvals)
    }
}

pub struct ProgressTracker {
    resolver: RequirementResolver,
    directory: Arc<dyn Directory>,
}

impl ProgressTracker {
    pub fn new(resolver: RequirementResolver, directory: Arc<dyn Directory>) -> Self {
        Self { resolver, directory }
    }

    pub async fn progress(
        &self,
        request: &PrivilegeRequest,
        applicant: &Practitioner,
        records: &[ApprovalRecord],
    ) -> Result<ApprovalProgress, StoreError> {
        let resolved = self.resolver.resolve(
            applicant.practitioner_type,
            request.privilege_type,
            &request.privileges,
            applicant.primary_specialty.as_ref(),
            &applicant.additional_specialties,
        );
        let requirement = resolved.requirement;

        // Distinct approver ids, not rows: the same consultant approving at
        // two nominal levels still counts once.
        let mut consultant_ids: HashSet<&str> = HashSet::new();
        let mut committee_approved = false;
        let mut director_approved = false;
        for record in records {
            if record.status != ApprovalStatus::Approved {
                continue;
            }
            match record.level {
                ApprovalLevel::MedicalDirector => director_approved = true,
                ApprovalLevel::Committee => {
                    committee_approved = true;
                    if self.is_consultant(record).await? {
                        consultant_ids.insert(record.approver_id.0.as_str());
                    }
                }
                ApprovalLevel::SectionHead | ApprovalLevel::DepartmentHead => {
                    if self.is_consultant(record).await? {
                        consultant_ids.insert(record.approver_id.0.as_str());
                    }
                }
            }
        }
        let consultant_approvals = consultant_ids.len() as u32;

        let consultants_satisfied = consultant_approvals >= requirement.required_consultants;
        let committee_satisfied =
            committee_approved || !requirement.requires_committee_review;
        let director_satisfied =
            director_approved || !requirement.requires_director_approval;
        let is_complete = consultants_satisfied && committee_satisfied && director_satisfied;

        // Consultants first, then committee, then director. The director is
        // never next until both prior conditions hold.
        let next_level = if !consultants_satisfied {
            Some(ApprovalLevel::SectionHead)
        } else if !committee_satisfied {
            Some(ApprovalLevel::Committee)
        } else if !director_satisfied {
            Some(ApprovalLevel::MedicalDirector)
        } else {
            None
        };

        let approved_ids: HashSet<&str> = records
            .iter()
            .filter(|record| record.status == ApprovalStatus::Approved)
            .map(|record| record.approver_id.0.as_str())
            .collect();
        let excluded = |user: &Practitioner| {
            user.id == applicant.id || approved_ids.contains(user.id.0.as_str())
        };

        let mut pending_approvers = Vec::new();
        if !consultants_satisfied {
            let preferred = preferred_specialty(request);
            for user in self.directory.consultants(preferred.as_ref()).await? {
                if !excluded(&user) {
                    pending_approvers
                        .push(PendingApprover { user, level: ApprovalLevel::SectionHead });
                }
            }
        }
        if requirement.requires_committee_review && !committee_approved {
            for user in self.directory.committee_members().await? {
                if !excluded(&user) {
                    pending_approvers
                        .push(PendingApprover { user, level: ApprovalLevel::Committee });
                }
            }
        }
        // Director solicitation is strictly gated behind the other two.
        if consultants_satisfied
            && committee_satisfied
            && requirement.requires_director_approval
            && !director_approved
        {
            for user in self.directory.medical_directors().await? {
                if !excluded(&user) {
                    pending_approvers
                        .push(PendingApprover { user, level: ApprovalLevel::MedicalDirector });
                }
            }
        }

        Ok(ApprovalProgress {
            consultant_approvals,
            required_consultants: requirement.required_consultants,
            committee_required: requirement.requires_committee_review,
            committee_approved,
            director_required: requirement.requires_director_approval,
            director_approved,
            is_complete,
            next_level,
            pending_approvers,
        })
    }

    async fn is_consultant(&self, record: &ApprovalRecord) -> Result<bool, StoreError> {
        Ok(self
            .directory
            .find_user(&record.approver_id)
            .await?
            .is_some_and(|user| user.is_consultant()))
    }
}

/// The specialty the requested privileges reference, used to order the
/// consultant pool. First specialty-bearing privilege wins.
fn preferred_specialty(request: &PrivilegeRequest) -> Option<Specialty> {
    request
        .privileges
        .iter()
        .find_map(|privilege| privilege.required_specialty.clone())
}

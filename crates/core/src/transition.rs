//! Records approval decisions and advances request status. This module and
//! the auto-approval fast path are the only writers of request status.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::authorize::AuthorizationGuard;
use crate::domain::approval::{ApprovalLevel, ApprovalRecord, ApprovalStatus};
use crate::domain::escalation::EscalationResolution;
use crate::domain::practitioner::UserId;
use crate::domain::request::{PrivilegeType, RequestId, RequestStatus};
use crate::errors::EngineError;
use crate::escalation::EscalationEngine;
use crate::ports::{ApprovalStore, Directory, RequestStore};
use crate::progress::ProgressTracker;
use crate::rules::{RequirementResolver, RuleKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub success: bool,
    pub status: RequestStatus,
    pub message: String,
}

pub struct TransitionProcessor {
    requests: Arc<dyn RequestStore>,
    approvals: Arc<dyn ApprovalStore>,
    directory: Arc<dyn Directory>,
    guard: Arc<AuthorizationGuard>,
    tracker: Arc<ProgressTracker>,
    escalations: Arc<EscalationEngine>,
}

impl TransitionProcessor {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        approvals: Arc<dyn ApprovalStore>,
        directory: Arc<dyn Directory>,
        guard: Arc<AuthorizationGuard>,
        tracker: Arc<ProgressTracker>,
        escalations: Arc<EscalationEngine>,
    ) -> Self {
        Self { requests, approvals, directory, guard, tracker, escalations }
    }

    pub async fn record_decision(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<DecisionOutcome, EngineError> {
        let request = self
            .requests
            .find_request(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.clone()))?;

        // Authorization is re-evaluated here, at the moment of recording.
        let auth = self.guard.can_approve(approver_id, request_id).await?;
        if !auth.allowed {
            tracing::info!(
                request_id = %request_id,
                approver_id = %approver_id,
                reason = %auth.reason,
                "decision refused by authorization guard"
            );
            return Ok(DecisionOutcome {
                success: false,
                status: request.status,
                message: auth.reason,
            });
        }
        // Allowed authorizations always carry the level to record at.
        let level = auth.level.unwrap_or(ApprovalLevel::SectionHead);

        let now = Utc::now();
        let record = ApprovalRecord {
            request_id: request_id.clone(),
            approver_id: approver_id.clone(),
            level,
            status: match decision {
                Decision::Approved => ApprovalStatus::Approved,
                Decision::Rejected => ApprovalStatus::Rejected,
            },
            comments,
            decided_at: now,
        };
        self.approvals.upsert(record).await?;

        match decision {
            Decision::Rejected => {
                // Rejection is terminal regardless of other pending
                // approvers; no progress computation.
                self.requests
                    .update_status(request_id, RequestStatus::Rejected, Some(now))
                    .await?;
                self.escalations
                    .mark_all_resolved(request_id, EscalationResolution::Rejected)
                    .await?;
                tracing::info!(
                    request_id = %request_id,
                    approver_id = %approver_id,
                    "request rejected"
                );
                Ok(DecisionOutcome {
                    success: true,
                    status: RequestStatus::Rejected,
                    message: "request rejected".to_string(),
                })
            }
            Decision::Approved => {
                let records = self.approvals.records_for_request(request_id).await?;
                let applicant = self
                    .directory
                    .find_user(&request.applicant_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::UserNotFound(request.applicant_id.clone())
                    })?;
                let progress =
                    self.tracker.progress(&request, &applicant, &records).await?;

                if progress.is_complete {
                    self.requests
                        .update_status(request_id, RequestStatus::Approved, Some(now))
                        .await?;
                    self.escalations
                        .mark_all_resolved(request_id, EscalationResolution::Approved)
                        .await?;
                    tracing::info!(
                        request_id = %request_id,
                        approver_id = %approver_id,
                        "request fully approved"
                    );
                    Ok(DecisionOutcome {
                        success: true,
                        status: RequestStatus::Approved,
                        message: "request fully approved".to_string(),
                    })
                } else {
                    self.requests
                        .update_status(request_id, RequestStatus::InReview, None)
                        .await?;
                    self.escalations
                        .mark_resolved(request_id, approver_id, EscalationResolution::Approved)
                        .await?;
                    let outstanding = progress.outstanding_consultants();
                    let message = if outstanding > 0 {
                        format!(
                            "{outstanding} more consultant approval{} needed",
                            if outstanding == 1 { "" } else { "s" }
                        )
                    } else if progress.committee_required && !progress.committee_approved {
                        "awaiting committee review".to_string()
                    } else {
                        "awaiting medical director approval".to_string()
                    };
                    tracing::info!(
                        request_id = %request_id,
                        approver_id = %approver_id,
                        outstanding_consultants = outstanding,
                        "approval recorded, request still in review"
                    );
                    Ok(DecisionOutcome {
                        success: true,
                        status: RequestStatus::InReview,
                        message,
                    })
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApprovalOutcome {
    pub auto_approved: bool,
    pub reason: String,
}

impl AutoApprovalOutcome {
    fn declined(reason: impl Into<String>) -> Self {
        Self { auto_approved: false, reason: reason.into() }
    }
}

/// Fast path that skips the approval chain entirely. Runs at submission
/// time, before any approver is solicited; creates no approval records.
pub struct AutoApprovalRule {
    requests: Arc<dyn RequestStore>,
    directory: Arc<dyn Directory>,
    resolver: RequirementResolver,
}

impl AutoApprovalRule {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        directory: Arc<dyn Directory>,
        resolver: RequirementResolver,
    ) -> Self {
        Self { requests, directory, resolver }
    }

    pub async fn try_auto_approve(
        &self,
        request_id: &RequestId,
    ) -> Result<AutoApprovalOutcome, EngineError> {
        let request = self
            .requests
            .find_request(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.clone()))?;

        if request.privilege_type != PrivilegeType::Core {
            return Ok(AutoApprovalOutcome::declined(
                "only core privilege requests are eligible for auto-approval",
            ));
        }
        if request.status != RequestStatus::Pending {
            return Ok(AutoApprovalOutcome::declined(format!(
                "request is not awaiting solicitation (status {:?})",
                request.status
            )));
        }

        let applicant = self
            .directory
            .find_user(&request.applicant_id)
            .await?
            .ok_or_else(|| EngineError::UserNotFound(request.applicant_id.clone()))?;

        // Core privileges are defined as always same-specialty.
        let resolved = self.resolver.resolve_key(RuleKey {
            privilege_type: PrivilegeType::Core,
            practitioner_type: applicant.practitioner_type,
            same_specialty: true,
        });
        if !resolved.requirement.auto_approve {
            return Ok(AutoApprovalOutcome::declined(
                "configuration does not allow auto-approval for this request",
            ));
        }

        self.requests
            .update_status(request_id, RequestStatus::Approved, Some(Utc::now()))
            .await?;
        tracing::info!(request_id = %request_id, "request auto-approved");
        Ok(AutoApprovalOutcome {
            auto_approved: true,
            reason: resolved.requirement.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::{AutoApprovalRule, Decision, TransitionProcessor};
    use crate::authorize::AuthorizationGuard;
    use crate::domain::approval::ApprovalStatus;
    use crate::domain::escalation::{EscalationResolution, PendingApproval};
    use crate::domain::practitioner::{
        Practitioner, PractitionerType, Specialty, UserId,
    };
    use crate::domain::request::{
        Privilege, PrivilegeRequest, PrivilegeType, RequestId, RequestStatus,
    };
    use crate::errors::EngineError;
    use crate::escalation::{EscalationConfig, EscalationEngine};
    use crate::memory::{
        InMemoryApprovalStore, InMemoryDirectory, InMemoryEscalationStore,
        InMemoryRequestStore, RecordingDispatcher,
    };
    use crate::progress::ProgressTracker;
    use crate::rules::{RequirementResolver, RuleEntry, RuleTable};

    fn consultant(id: &str) -> Practitioner {
        Practitioner {
            id: UserId(id.to_string()),
            display_name: id.to_string(),
            practitioner_type: PractitionerType::Consultant,
            primary_specialty: Some(Specialty("gastroenterology".to_string())),
            additional_specialties: Vec::new(),
            can_approve: true,
            committee_member: false,
            medical_director: false,
            manager_id: None,
        }
    }

    fn gp(id: &str) -> Practitioner {
        Practitioner {
            practitioner_type: PractitionerType::GeneralPractitioner,
            primary_specialty: None,
            ..consultant(id)
        }
    }

    fn request(privilege_type: PrivilegeType) -> PrivilegeRequest {
        PrivilegeRequest {
            id: RequestId("req-1".to_string()),
            applicant_id: UserId("u-applicant".to_string()),
            privilege_type,
            status: RequestStatus::Pending,
            privileges: vec![Privilege {
                id: "priv-1".to_string(),
                name: "Endoscopy".to_string(),
                category: privilege_type,
                required_specialty: Some(Specialty("gastroenterology".to_string())),
            }],
            submitted_at: Utc::now(),
            completed_at: None,
        }
    }

    struct Fixture {
        processor: TransitionProcessor,
        auto_approval: AutoApprovalRule,
        requests: Arc<InMemoryRequestStore>,
        approvals: Arc<InMemoryApprovalStore>,
        escalation_store: Arc<InMemoryEscalationStore>,
        escalations: Arc<EscalationEngine>,
    }

    async fn fixture_with_rules(entries: Vec<RuleEntry>) -> Fixture {
        let directory = Arc::new(InMemoryDirectory::with_users(vec![
            consultant("u-applicant"),
            gp("u-gp"),
            consultant("u-con-1"),
            consultant("u-con-2"),
            Practitioner { committee_member: true, ..consultant("u-committee") },
            Practitioner { medical_director: true, ..consultant("u-director") },
        ]));
        let requests = Arc::new(InMemoryRequestStore::default());
        let approvals = Arc::new(InMemoryApprovalStore::default());
        let escalation_store = Arc::new(InMemoryEscalationStore::default());
        let resolver = RequirementResolver::new(RuleTable::from_entries(entries.clone()));
        let tracker =
            Arc::new(ProgressTracker::new(resolver.clone(), directory.clone()));
        let guard = Arc::new(AuthorizationGuard::new(
            requests.clone(),
            approvals.clone(),
            directory.clone(),
            tracker.clone(),
        ));
        let escalations = Arc::new(EscalationEngine::new(
            EscalationConfig::default(),
            requests.clone(),
            directory.clone(),
            escalation_store.clone(),
            Arc::new(RecordingDispatcher::default()),
        ));
        let processor = TransitionProcessor::new(
            requests.clone(),
            approvals.clone(),
            directory.clone(),
            guard,
            tracker,
            escalations.clone(),
        );
        let auto_approval = AutoApprovalRule::new(
            requests.clone(),
            directory,
            RequirementResolver::new(RuleTable::from_entries(entries)),
        );
        Fixture {
            processor,
            auto_approval,
            requests,
            approvals,
            escalation_store,
            escalations,
        }
    }

    fn two_consultant_rule() -> RuleEntry {
        RuleEntry {
            privilege_type: PrivilegeType::NonCore,
            practitioner_type: PractitionerType::Consultant,
            same_specialty: true,
            required_consultants: 2,
            requires_committee_review: false,
            requires_director_approval: false,
            auto_approve: false,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn partial_consultant_approval_moves_request_into_review() {
        let fixture = fixture_with_rules(vec![two_consultant_rule()]).await;
        fixture.requests.insert(request(PrivilegeType::NonCore)).await;

        let outcome = fixture
            .processor
            .record_decision(
                &RequestId("req-1".to_string()),
                &UserId("u-con-1".to_string()),
                Decision::Approved,
                None,
            )
            .await
            .expect("decision");

        assert!(outcome.success);
        assert_eq!(outcome.status, RequestStatus::InReview);
        assert_eq!(outcome.message, "1 more consultant approval needed");
        let stored = fixture.requests.get(&RequestId("req-1".to_string())).await.unwrap();
        assert_eq!(stored.status, RequestStatus::InReview);
        assert!(stored.completed_at.is_none());
        assert_eq!(fixture.approvals.all().await.len(), 1);
    }

    #[tokio::test]
    async fn final_consultant_approval_completes_the_request() {
        let fixture = fixture_with_rules(vec![two_consultant_rule()]).await;
        fixture.requests.insert(request(PrivilegeType::NonCore)).await;
        let request_id = RequestId("req-1".to_string());

        fixture
            .processor
            .record_decision(&request_id, &UserId("u-con-1".to_string()), Decision::Approved, None)
            .await
            .expect("first");
        let outcome = fixture
            .processor
            .record_decision(&request_id, &UserId("u-con-2".to_string()), Decision::Approved, None)
            .await
            .expect("second");

        assert!(outcome.success);
        assert_eq!(outcome.status, RequestStatus::Approved);
        let stored = fixture.requests.get(&request_id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Approved);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn consultant_done_but_committee_pending_reports_committee() {
        let rule = RuleEntry {
            required_consultants: 1,
            requires_committee_review: true,
            ..two_consultant_rule()
        };
        let fixture = fixture_with_rules(vec![rule]).await;
        fixture.requests.insert(request(PrivilegeType::NonCore)).await;

        let outcome = fixture
            .processor
            .record_decision(
                &RequestId("req-1".to_string()),
                &UserId("u-con-1".to_string()),
                Decision::Approved,
                None,
            )
            .await
            .expect("decision");

        assert_eq!(outcome.status, RequestStatus::InReview);
        assert_eq!(outcome.message, "awaiting committee review");
    }

    #[tokio::test]
    async fn rejection_is_terminal_regardless_of_other_approvers() {
        let fixture = fixture_with_rules(vec![two_consultant_rule()]).await;
        fixture.requests.insert(request(PrivilegeType::NonCore)).await;
        let request_id = RequestId("req-1".to_string());

        let outcome = fixture
            .processor
            .record_decision(
                &request_id,
                &UserId("u-con-1".to_string()),
                Decision::Rejected,
                Some("insufficient case volume".to_string()),
            )
            .await
            .expect("rejection");

        assert!(outcome.success);
        assert_eq!(outcome.status, RequestStatus::Rejected);
        let stored = fixture.requests.get(&request_id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Rejected);
        assert!(stored.completed_at.is_some());

        // The request is closed; a further decision is refused.
        let refused = fixture
            .processor
            .record_decision(&request_id, &UserId("u-con-2".to_string()), Decision::Approved, None)
            .await
            .expect("refused");
        assert!(!refused.success);
        assert_eq!(refused.status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn denied_decision_mutates_nothing() {
        let fixture = fixture_with_rules(vec![two_consultant_rule()]).await;
        fixture.requests.insert(request(PrivilegeType::NonCore)).await;

        let outcome = fixture
            .processor
            .record_decision(
                &RequestId("req-1".to_string()),
                &UserId("u-applicant".to_string()),
                Decision::Approved,
                None,
            )
            .await
            .expect("self-approval attempt");

        assert!(!outcome.success);
        assert_eq!(outcome.message, "cannot approve own request");
        assert_eq!(outcome.status, RequestStatus::Pending);
        assert!(fixture.approvals.all().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_request_surfaces_not_found() {
        let fixture = fixture_with_rules(vec![two_consultant_rule()]).await;

        let error = fixture
            .processor
            .record_decision(
                &RequestId("req-404".to_string()),
                &UserId("u-con-1".to_string()),
                Decision::Approved,
                None,
            )
            .await
            .expect_err("missing request");

        assert!(matches!(error, EngineError::RequestNotFound(_)));
    }

    #[tokio::test]
    async fn rejection_resolves_pending_escalations_for_the_request() {
        let fixture = fixture_with_rules(vec![two_consultant_rule()]).await;
        fixture.requests.insert(request(PrivilegeType::NonCore)).await;
        // A reminder already went out for this approver.
        fixture
            .escalations
            .process_escalation(&PendingApproval {
                request: request(PrivilegeType::NonCore),
                approver: consultant("u-con-1"),
                pending_since: Utc::now() - chrono::Duration::hours(25),
            })
            .await
            .expect("escalate");

        fixture
            .processor
            .record_decision(
                &RequestId("req-1".to_string()),
                &UserId("u-con-1".to_string()),
                Decision::Rejected,
                None,
            )
            .await
            .expect("rejection");

        let records = fixture.escalation_store.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resolution, Some(EscalationResolution::Rejected));
    }

    #[tokio::test]
    async fn approval_record_status_matches_decision() {
        let fixture = fixture_with_rules(vec![two_consultant_rule()]).await;
        fixture.requests.insert(request(PrivilegeType::NonCore)).await;

        fixture
            .processor
            .record_decision(
                &RequestId("req-1".to_string()),
                &UserId("u-con-1".to_string()),
                Decision::Approved,
                Some("meets requirements".to_string()),
            )
            .await
            .expect("decision");

        let records = fixture.approvals.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ApprovalStatus::Approved);
        assert_eq!(records[0].comments.as_deref(), Some("meets requirements"));
    }

    fn core_auto_approve_rule(auto_approve: bool) -> RuleEntry {
        RuleEntry {
            privilege_type: PrivilegeType::Core,
            practitioner_type: PractitionerType::GeneralPractitioner,
            same_specialty: true,
            required_consultants: 0,
            requires_committee_review: false,
            requires_director_approval: false,
            auto_approve,
            description: "core privileges for general practitioners".to_string(),
        }
    }

    #[tokio::test]
    async fn gp_core_request_with_auto_approve_goes_straight_to_approved() {
        let fixture = fixture_with_rules(vec![core_auto_approve_rule(true)]).await;
        let mut core_request = request(PrivilegeType::Core);
        core_request.applicant_id = UserId("u-gp".to_string());
        fixture.requests.insert(core_request).await;
        let request_id = RequestId("req-1".to_string());

        let outcome = fixture
            .auto_approval
            .try_auto_approve(&request_id)
            .await
            .expect("auto-approve");

        assert!(outcome.auto_approved);
        let stored = fixture.requests.get(&request_id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Approved);
        assert!(stored.completed_at.is_some());
        assert!(fixture.approvals.all().await.is_empty());
    }

    #[tokio::test]
    async fn non_core_request_never_auto_approves() {
        let fixture = fixture_with_rules(vec![core_auto_approve_rule(true)]).await;
        fixture.requests.insert(request(PrivilegeType::NonCore)).await;

        let outcome = fixture
            .auto_approval
            .try_auto_approve(&RequestId("req-1".to_string()))
            .await
            .expect("attempt");

        assert!(!outcome.auto_approved);
        let stored = fixture.requests.get(&RequestId("req-1".to_string())).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn core_request_without_auto_approve_flag_declines() {
        let fixture = fixture_with_rules(vec![core_auto_approve_rule(false)]).await;
        fixture.requests.insert(request(PrivilegeType::Core)).await;

        let outcome = fixture
            .auto_approval
            .try_auto_approve(&RequestId("req-1".to_string()))
            .await
            .expect("attempt");

        assert!(!outcome.auto_approved);
    }

    #[tokio::test]
    async fn missing_rule_falls_back_and_declines_auto_approval() {
        let fixture = fixture_with_rules(Vec::new()).await;
        fixture.requests.insert(request(PrivilegeType::Core)).await;

        let outcome = fixture
            .auto_approval
            .try_auto_approve(&RequestId("req-1".to_string()))
            .await
            .expect("attempt");

        assert!(!outcome.auto_approved);
    }

    #[tokio::test]
    async fn auto_approval_declines_once_review_has_started() {
        let fixture = fixture_with_rules(vec![core_auto_approve_rule(true)]).await;
        let mut in_review = request(PrivilegeType::Core);
        in_review.status = RequestStatus::InReview;
        fixture.requests.insert(in_review).await;

        let outcome = fixture
            .auto_approval
            .try_auto_approve(&RequestId("req-1".to_string()))
            .await
            .expect("attempt");

        assert!(!outcome.auto_approved);
    }
}

pub mod authorize;
pub mod config;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod memory;
pub mod ports;
pub mod progress;
pub mod rules;
pub mod transition;

pub use authorize::{ApprovalAuthorization, AuthorizationDenial, AuthorizationGuard};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::approval::{
    ApprovalLevel, ApprovalRecord, ApprovalRequirement, ApprovalStatus,
};
pub use domain::escalation::{
    EscalationId, EscalationLevel, EscalationRecord, EscalationResolution, PendingApproval,
};
pub use domain::practitioner::{Practitioner, PractitionerType, Specialty, UserId};
pub use domain::request::{
    Privilege, PrivilegeRequest, PrivilegeType, RequestId, RequestStatus,
};
pub use errors::{EngineError, StoreError};
pub use escalation::{
    EscalationConfig, EscalationEngine, EscalationOutcome, EscalationReport, SweepStats,
};
pub use ports::{
    ApprovalStore, Directory, DispatchOutcome, EscalationNotice, EscalationStore,
    NotificationDispatcher, RequestStore,
};
pub use progress::{ApprovalProgress, PendingApprover, ProgressTracker};
pub use rules::{
    RequirementResolver, ResolvedRequirement, RuleEntry, RuleKey, RuleTable,
};
pub use transition::{
    AutoApprovalOutcome, AutoApprovalRule, Decision, DecisionOutcome, TransitionProcessor,
};

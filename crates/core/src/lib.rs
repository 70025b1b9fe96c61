pub mod approvals;
pub mod audit;
pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;

pub use approvals::{
    can_approve, filter_by_type, ApprovalCommand, ApprovalEngine, EntityApprovalStatus,
    PendingApprovals, RequestDetail, RequestFilter, TransitionOutcome,
};
pub use audit::{
    AuditContext, AuditDetail, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use cache::{CacheStats, CachedQuery, Mutation, QueryCache, QueryKey};
pub use domain::approval::{
    ActionId, ActionType, ApprovalAction, ApprovalId, ApprovalRequest, ApprovalStatus,
};
pub use domain::entity::{EntityRef, EntityType};
pub use domain::workflow::{ApprovalWorkflow, WorkflowId, WorkflowStep};
pub use errors::{ApprovalError, InterfaceError};
pub use notify::{InMemoryNotifier, Notification, Notifier, TracingNotifier};

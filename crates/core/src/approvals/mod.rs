pub mod engine;
pub mod views;

pub use engine::{can_approve, ApprovalCommand, ApprovalEngine, TransitionOutcome};
pub use views::{
    filter_by_type, pending_for, EntityApprovalStatus, PendingApprovals, RequestDetail,
    RequestFilter,
};

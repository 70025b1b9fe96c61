use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entity::EntityRef;
use crate::domain::workflow::WorkflowId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(format!("APR-{}", &Uuid::new_v4().simple().to_string()[..12]))
    }
}

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn generate() -> Self {
        Self(format!("ACT-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    ApprovedWithConditions,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::ApprovedWithConditions => "approved_with_conditions",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "approved_with_conditions" => Some(Self::ApprovedWithConditions),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub workflow_id: WorkflowId,
    pub entity: EntityRef,
    pub status: ApprovalStatus,
    pub current_step: u32,
    pub initiated_by: String,
    pub initiated_at: DateTime<Utc>,
    pub conditions: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every committed transition; storage compares it before writing.
    pub version: u32,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Submit,
    Approve,
    ApproveWithConditions,
    Reject,
    Cancel,
    Comment,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::ApproveWithConditions => "approve_with_conditions",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
            Self::Comment => "comment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submit" => Some(Self::Submit),
            "approve" => Some(Self::Approve),
            "approve_with_conditions" => Some(Self::ApproveWithConditions),
            "reject" => Some(Self::Reject),
            "cancel" => Some(Self::Cancel),
            "comment" => Some(Self::Comment),
            _ => None,
        }
    }
}

/// Append-only history entry for a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAction {
    pub id: ActionId,
    pub request_id: ApprovalId,
    pub actor_id: String,
    pub action_type: ActionType,
    pub comment: Option<String>,
    pub conditions: Option<String>,
    /// Step the request was on when the action was taken.
    pub step_order: u32,
    pub timestamp: DateTime<Utc>,
}

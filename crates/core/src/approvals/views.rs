use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::approvals::engine::can_approve;
use crate::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use crate::domain::entity::{EntityLink, EntityRef, EntityType};
use crate::domain::workflow::{ApprovalWorkflow, WorkflowId};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApprovals {
    pub requests: Vec<ApprovalRequest>,
    pub total: usize,
}

impl PendingApprovals {
    pub fn new(requests: Vec<ApprovalRequest>) -> Self {
        let total = requests.len();
        Self { requests, total }
    }

    pub fn filter_by_type(self, entity_type: Option<EntityType>) -> Self {
        Self::new(filter_by_type(self.requests, entity_type))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFilter {
    pub initiated_by: Option<String>,
}

impl RequestFilter {
    pub fn initiated_by(user_id: impl Into<String>) -> Self {
        Self { initiated_by: Some(user_id.into()) }
    }

    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        self.initiated_by.as_deref().map_or(true, |user| request.initiated_by == user)
    }
}

/// A request together with the workflow it runs on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: ApprovalRequest,
    pub workflow: ApprovalWorkflow,
    pub entity_link: EntityLink,
}

impl RequestDetail {
    pub fn new(request: ApprovalRequest, workflow: ApprovalWorkflow) -> Self {
        let entity_link = request.entity.link();
        Self { request, workflow, entity_link }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityApprovalStatus {
    pub entity: EntityRef,
    pub entity_link: EntityLink,
    pub has_active_request: bool,
    pub active_request_id: Option<ApprovalId>,
    pub can_submit: bool,
    pub can_approve: bool,
    pub latest_status: Option<ApprovalStatus>,
}

impl EntityApprovalStatus {
    /// `active` is the entity's pending request with its workflow; `latest` is
    /// the newest request of any status.
    pub fn evaluate(
        entity: EntityRef,
        active: Option<(&ApprovalRequest, &ApprovalWorkflow)>,
        latest: Option<&ApprovalRequest>,
        user_id: &str,
    ) -> Self {
        let active = active.filter(|(request, _)| request.is_pending());
        Self {
            entity_link: entity.link(),
            entity,
            has_active_request: active.is_some(),
            active_request_id: active.map(|(request, _)| request.id.clone()),
            can_submit: active.is_none(),
            can_approve: active
                .is_some_and(|(request, workflow)| can_approve(request, workflow, user_id)),
            latest_status: latest.map(|request| request.status),
        }
    }
}

/// Pure intersection over an already-fetched set. `None` keeps everything.
pub fn filter_by_type(
    requests: Vec<ApprovalRequest>,
    entity_type: Option<EntityType>,
) -> Vec<ApprovalRequest> {
    match entity_type {
        Some(entity_type) => requests
            .into_iter()
            .filter(|request| request.entity.entity_type == entity_type)
            .collect(),
        None => requests,
    }
}

/// Pending requests the user may act on now, oldest first.
pub fn pending_for(
    requests: &[ApprovalRequest],
    workflows: &HashMap<WorkflowId, ApprovalWorkflow>,
    user_id: &str,
) -> PendingApprovals {
    let mut eligible: Vec<ApprovalRequest> = requests
        .iter()
        .filter(|request| {
            workflows
                .get(&request.workflow_id)
                .is_some_and(|workflow| can_approve(request, workflow, user_id))
        })
        .cloned()
        .collect();
    eligible.sort_by(|a, b| a.initiated_at.cmp(&b.initiated_at).then_with(|| a.id.cmp(&b.id)));
    PendingApprovals::new(eligible)
}

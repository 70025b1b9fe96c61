use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ActionType, ApprovalId, ApprovalStatus};
use crate::domain::entity::EntityRef;
use crate::domain::workflow::WorkflowId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
}

/// Who acted, on which request, under which correlation id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub request_id: Option<ApprovalId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        request_id: Option<ApprovalId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { request_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }
}

/// What happened, with the fields each kind of event carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditDetail {
    RequestSubmitted { entity: EntityRef, workflow_id: WorkflowId },
    TransitionApplied { action: ActionType, from: ApprovalStatus, to: ApprovalStatus, step: u32 },
    TransitionRejected { action: ActionType, error_kind: String, reason: String },
    WorkflowCreated { workflow_id: WorkflowId, steps: usize },
}

impl AuditDetail {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RequestSubmitted { .. } => "approval.request_submitted",
            Self::TransitionApplied { .. } => "approval.transition_applied",
            Self::TransitionRejected { .. } => "approval.transition_rejected",
            Self::WorkflowCreated { .. } => "workflow.created",
        }
    }

    pub fn outcome(&self) -> AuditOutcome {
        match self {
            Self::TransitionRejected { .. } => AuditOutcome::Rejected,
            _ => AuditOutcome::Success,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub request_id: Option<ApprovalId>,
    pub correlation_id: String,
    pub actor: String,
    pub detail: AuditDetail,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(context: &AuditContext, detail: AuditDetail) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            request_id: context.request_id.clone(),
            correlation_id: context.correlation_id.clone(),
            actor: context.actor.clone(),
            detail,
            occurred_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.detail.event_type()
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards audit events to the tracing subscriber.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let request_id = event.request_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none");
        tracing::info!(
            event_name = event.event_type(),
            correlation_id = %event.correlation_id,
            request_id,
            actor_id = %event.actor,
            outcome = ?event.detail.outcome(),
            detail = ?event.detail,
            "audit event"
        );
    }
}

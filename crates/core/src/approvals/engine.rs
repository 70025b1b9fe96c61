use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditContext, AuditDetail, AuditEvent, AuditSink};
use crate::domain::approval::{
    ActionId, ActionType, ApprovalAction, ApprovalId, ApprovalRequest, ApprovalStatus,
};
use crate::domain::entity::EntityRef;
use crate::domain::workflow::ApprovalWorkflow;
use crate::errors::ApprovalError;
use crate::notify::Notification;

/// A mutation requested by an actor against an existing request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovalCommand {
    Approve { comment: Option<String> },
    ApproveWithConditions { conditions: String, comment: Option<String> },
    Reject { comment: String },
    Cancel,
    Comment { comment: String },
}

impl ApprovalCommand {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Approve { .. } => ActionType::Approve,
            Self::ApproveWithConditions { .. } => ActionType::ApproveWithConditions,
            Self::Reject { .. } => ActionType::Reject,
            Self::Cancel => ActionType::Cancel,
            Self::Comment { .. } => ActionType::Comment,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from_status: Option<ApprovalStatus>,
    pub from_step: Option<u32>,
    /// The request as it must be stored. Unchanged for comments.
    pub request: ApprovalRequest,
    pub action: ApprovalAction,
    pub notification: Option<Notification>,
}

impl TransitionOutcome {
    /// False for comments, which append history without touching the request.
    pub fn changes_request(&self) -> bool {
        self.action.action_type != ActionType::Comment
    }
}

/// True iff the request is pending and the user may act on its current step.
pub fn can_approve(request: &ApprovalRequest, workflow: &ApprovalWorkflow, user_id: &str) -> bool {
    request.is_pending()
        && workflow.step(request.current_step).is_some_and(|step| step.is_approver(user_id))
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalEngine;

impl ApprovalEngine {
    pub fn new() -> Self {
        Self
    }

    /// Opens a request on step 1 of `workflow`. The one-active-request-per-entity
    /// rule needs storage and is checked by the caller.
    pub fn submit(
        &self,
        workflow: &ApprovalWorkflow,
        entity: EntityRef,
        initiated_by: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let initiated_by = initiated_by.trim();
        if initiated_by.is_empty() {
            return Err(ApprovalError::validation("initiated_by", "initiator is required"));
        }
        if entity.entity_id.trim().is_empty() {
            return Err(ApprovalError::validation("entity_id", "entity id is required"));
        }
        if !workflow.accepts(entity.entity_type) {
            return Err(ApprovalError::validation(
                "workflow_id",
                format!("workflow `{}` does not apply to {}", workflow.id.0, entity.entity_type),
            ));
        }
        let first = workflow.step(1).ok_or_else(|| {
            ApprovalError::validation("workflow_id", "workflow has no steps")
        })?;

        let request = ApprovalRequest {
            id: ApprovalId::generate(),
            workflow_id: workflow.id.clone(),
            entity: entity.clone(),
            status: ApprovalStatus::Pending,
            current_step: 1,
            initiated_by: initiated_by.to_string(),
            initiated_at: now,
            conditions: None,
            resolved_at: None,
            updated_at: now,
            version: 1,
        };
        let action = ApprovalAction {
            id: ActionId::generate(),
            request_id: request.id.clone(),
            actor_id: request.initiated_by.clone(),
            action_type: ActionType::Submit,
            comment: None,
            conditions: None,
            step_order: 1,
            timestamp: now,
        };
        let notification = Notification::StepAdvanced {
            request_id: request.id.clone(),
            entity,
            step_order: 1,
            step_name: first.name.clone(),
            recipients: first.approver_ids.iter().cloned().collect(),
        };

        Ok(TransitionOutcome {
            from_status: None,
            from_step: None,
            request,
            action,
            notification: Some(notification),
        })
    }

    pub fn apply(
        &self,
        request: &ApprovalRequest,
        workflow: &ApprovalWorkflow,
        actor_id: &str,
        command: &ApprovalCommand,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        if request.workflow_id != workflow.id {
            return Err(ApprovalError::invalid_state(format!(
                "request `{}` belongs to workflow `{}`, not `{}`",
                request.id.0, request.workflow_id.0, workflow.id.0
            )));
        }

        // History timestamps never precede the request itself.
        let timestamp = now.max(request.initiated_at);

        match command {
            ApprovalCommand::Comment { comment } => {
                comment_on(request, workflow, actor_id, comment, timestamp)
            }
            ApprovalCommand::Cancel => cancel(request, actor_id, timestamp),
            ApprovalCommand::Approve { comment } => {
                ensure_reviewer(request, workflow, actor_id)?;
                approve(request, workflow, actor_id, optional_text(comment.as_deref()), timestamp)
            }
            ApprovalCommand::ApproveWithConditions { conditions, comment } => {
                ensure_reviewer(request, workflow, actor_id)?;
                let conditions = required_text("conditions", conditions, "conditions are required")?;
                let mut next = request.clone();
                next.status = ApprovalStatus::ApprovedWithConditions;
                next.conditions = Some(conditions.clone());
                Ok(resolve(
                    request,
                    next,
                    actor_id,
                    ActionType::ApproveWithConditions,
                    optional_text(comment.as_deref()),
                    Some(conditions),
                    timestamp,
                ))
            }
            ApprovalCommand::Reject { comment } => {
                ensure_reviewer(request, workflow, actor_id)?;
                let comment =
                    required_text("comment", comment, "a comment is required to reject")?;
                let mut next = request.clone();
                next.status = ApprovalStatus::Rejected;
                Ok(resolve(
                    request,
                    next,
                    actor_id,
                    ActionType::Reject,
                    Some(comment),
                    None,
                    timestamp,
                ))
            }
        }
    }

    pub fn apply_with_audit<S>(
        &self,
        request: &ApprovalRequest,
        workflow: &ApprovalWorkflow,
        actor_id: &str,
        command: &ApprovalCommand,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, ApprovalError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(request, workflow, actor_id, command, now);
        match &result {
            Ok(outcome) => sink.emit(AuditEvent::new(
                audit,
                AuditDetail::TransitionApplied {
                    action: outcome.action.action_type,
                    from: request.status,
                    to: outcome.request.status,
                    step: outcome.request.current_step,
                },
            )),
            Err(error) => sink.emit(AuditEvent::new(
                audit,
                AuditDetail::TransitionRejected {
                    action: command.action_type(),
                    error_kind: error.kind().to_string(),
                    reason: error.to_string(),
                },
            )),
        }
        result
    }
}

fn ensure_reviewer(
    request: &ApprovalRequest,
    workflow: &ApprovalWorkflow,
    actor_id: &str,
) -> Result<(), ApprovalError> {
    ensure_pending(request)?;
    let step = workflow.step(request.current_step).ok_or_else(|| {
        ApprovalError::invalid_state(format!(
            "current step {} is outside workflow `{}`",
            request.current_step, workflow.id.0
        ))
    })?;
    if !step.is_approver(actor_id) {
        return Err(ApprovalError::NotAuthorized);
    }
    Ok(())
}

fn ensure_pending(request: &ApprovalRequest) -> Result<(), ApprovalError> {
    if request.is_pending() {
        return Ok(());
    }
    Err(ApprovalError::invalid_state(format!(
        "request `{}` is already {}",
        request.id.0,
        request.status.as_str()
    )))
}

fn approve(
    request: &ApprovalRequest,
    workflow: &ApprovalWorkflow,
    actor_id: &str,
    comment: Option<String>,
    timestamp: DateTime<Utc>,
) -> Result<TransitionOutcome, ApprovalError> {
    if workflow.is_final_step(request.current_step) {
        let mut next = request.clone();
        next.status = ApprovalStatus::Approved;
        return Ok(resolve(request, next, actor_id, ActionType::Approve, comment, None, timestamp));
    }

    let next_step = request.current_step + 1;
    let step = workflow.step(next_step).ok_or_else(|| {
        ApprovalError::invalid_state(format!("workflow `{}` has no step {next_step}", workflow.id.0))
    })?;

    let mut next = request.clone();
    next.current_step = next_step;
    next.updated_at = timestamp;
    next.version += 1;

    let notification = Notification::StepAdvanced {
        request_id: request.id.clone(),
        entity: request.entity.clone(),
        step_order: next_step,
        step_name: step.name.clone(),
        recipients: step.approver_ids.iter().cloned().collect(),
    };

    Ok(TransitionOutcome {
        from_status: Some(request.status),
        from_step: Some(request.current_step),
        action: action(request, actor_id, ActionType::Approve, comment, None, timestamp),
        request: next,
        notification: Some(notification),
    })
}

fn cancel(
    request: &ApprovalRequest,
    actor_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<TransitionOutcome, ApprovalError> {
    ensure_pending(request)?;
    if request.initiated_by != actor_id {
        return Err(ApprovalError::NotAuthorized);
    }

    let mut next = request.clone();
    next.status = ApprovalStatus::Cancelled;
    Ok(resolve(request, next, actor_id, ActionType::Cancel, None, None, timestamp))
}

fn comment_on(
    request: &ApprovalRequest,
    workflow: &ApprovalWorkflow,
    actor_id: &str,
    comment: &str,
    timestamp: DateTime<Utc>,
) -> Result<TransitionOutcome, ApprovalError> {
    let participant = request.initiated_by == actor_id || workflow.is_participant(actor_id);
    if !participant {
        return Err(ApprovalError::NotAuthorized);
    }
    let comment = required_text("comment", comment, "comment text is required")?;

    Ok(TransitionOutcome {
        from_status: Some(request.status),
        from_step: Some(request.current_step),
        action: action(request, actor_id, ActionType::Comment, Some(comment), None, timestamp),
        request: request.clone(),
        notification: None,
    })
}

/// Moves `next` into a terminal status. `current_step` is left where it was.
fn resolve(
    request: &ApprovalRequest,
    mut next: ApprovalRequest,
    actor_id: &str,
    action_type: ActionType,
    comment: Option<String>,
    conditions: Option<String>,
    timestamp: DateTime<Utc>,
) -> TransitionOutcome {
    next.resolved_at = Some(timestamp);
    next.updated_at = timestamp;
    next.version += 1;

    let notification = Notification::RequestResolved {
        request_id: request.id.clone(),
        entity: request.entity.clone(),
        status: next.status,
        recipient: request.initiated_by.clone(),
    };

    TransitionOutcome {
        from_status: Some(request.status),
        from_step: Some(request.current_step),
        action: action(request, actor_id, action_type, comment, conditions, timestamp),
        request: next,
        notification: Some(notification),
    }
}

fn action(
    request: &ApprovalRequest,
    actor_id: &str,
    action_type: ActionType,
    comment: Option<String>,
    conditions: Option<String>,
    timestamp: DateTime<Utc>,
) -> ApprovalAction {
    ApprovalAction {
        id: ActionId::generate(),
        request_id: request.id.clone(),
        actor_id: actor_id.to_string(),
        action_type,
        comment,
        conditions,
        step_order: request.current_step,
        timestamp,
    }
}

fn required_text(
    field: &'static str,
    value: &str,
    message: &'static str,
) -> Result<String, ApprovalError> {
    optional_text(Some(value)).ok_or_else(|| ApprovalError::validation(field, message))
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|text| !text.is_empty()).map(str::to_string)
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use sitegate_core::approvals::{
    self, ApprovalCommand, ApprovalEngine, EntityApprovalStatus, PendingApprovals, RequestDetail,
    RequestFilter, TransitionOutcome,
};
use sitegate_core::audit::{AuditContext, AuditDetail, AuditEvent, AuditSink};
use sitegate_core::cache::{CachedQuery, Mutation, QueryCache, QueryKey};
use sitegate_core::domain::approval::{ApprovalAction, ApprovalId, ApprovalRequest};
use sitegate_core::domain::entity::{EntityRef, EntityType};
use sitegate_core::domain::workflow::{ApprovalWorkflow, WorkflowId, WorkflowStep};
use sitegate_core::errors::ApprovalError;
use sitegate_core::notify::Notifier;
use sitegate_db::{ApprovalRepository, RepositoryError, WorkflowRepository};

/// Who is calling, plus the id that ties their logs and audit events together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActorContext {
    pub user_id: String,
    pub correlation_id: String,
}

impl ActorContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), correlation_id: Uuid::new_v4().to_string() }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    fn audit_context(&self, request_id: Option<ApprovalId>) -> AuditContext {
        AuditContext::new(request_id, self.correlation_id.clone(), self.user_id.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewWorkflow {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    pub steps: Vec<NewWorkflowStep>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewWorkflowStep {
    pub name: String,
    pub approver_ids: Vec<String>,
}

#[derive(Clone)]
pub struct ApprovalService {
    workflows: Arc<dyn WorkflowRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    cache: QueryCache,
    engine: ApprovalEngine,
}

impl ApprovalService {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        cache: QueryCache,
    ) -> Self {
        Self { workflows, approvals, notifier, audit, cache, engine: ApprovalEngine::new() }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn get_request(&self, id: &ApprovalId) -> Result<RequestDetail, ApprovalError> {
        let key = QueryKey::Request(id.clone());
        if let Some(CachedQuery::Request(detail)) = self.cache.get(&key) {
            return Ok(detail);
        }

        let ticket = self.cache.ticket();
        let request = self.load_request(id).await?;
        let workflow = self.load_workflow(&request.workflow_id).await?;
        let detail = RequestDetail::new(request, workflow);
        self.cache.insert(ticket, key, CachedQuery::Request(detail.clone()));
        Ok(detail)
    }

    pub async fn list_pending(&self, user_id: &str) -> Result<PendingApprovals, ApprovalError> {
        let key = QueryKey::Pending(user_id.to_string());
        if let Some(CachedQuery::Pending(pending)) = self.cache.get(&key) {
            return Ok(pending);
        }

        let ticket = self.cache.ticket();
        let pending = self.approvals.list_pending().await.map_err(|e| persistence("list_pending", e))?;
        let workflows: HashMap<WorkflowId, ApprovalWorkflow> = self
            .workflows
            .list()
            .await
            .map_err(|e| persistence("list_workflows", e))?
            .into_iter()
            .map(|workflow| (workflow.id.clone(), workflow))
            .collect();

        let view = approvals::pending_for(&pending, &workflows, user_id);
        self.cache.insert(ticket, key, CachedQuery::Pending(view.clone()));
        Ok(view)
    }

    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let key = QueryKey::Requests(filter.clone());
        if let Some(CachedQuery::Requests(requests)) = self.cache.get(&key) {
            return Ok(requests);
        }

        let ticket = self.cache.ticket();
        let requests =
            self.approvals.list(filter).await.map_err(|e| persistence("list_requests", e))?;
        self.cache.insert(ticket, key, CachedQuery::Requests(requests.clone()));
        Ok(requests)
    }

    pub async fn my_requests(&self, user_id: &str) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.list_requests(&RequestFilter::initiated_by(user_id)).await
    }

    /// Unknown ids have no history; this never fails with `NotFound`.
    pub async fn get_history(&self, id: &ApprovalId) -> Result<Vec<ApprovalAction>, ApprovalError> {
        let key = QueryKey::History(id.clone());
        if let Some(CachedQuery::History(actions)) = self.cache.get(&key) {
            return Ok(actions);
        }

        let ticket = self.cache.ticket();
        let actions =
            self.approvals.list_actions(id).await.map_err(|e| persistence("list_actions", e))?;
        self.cache.insert(ticket, key, CachedQuery::History(actions.clone()));
        Ok(actions)
    }

    pub async fn can_approve(&self, id: &ApprovalId, user_id: &str) -> Result<bool, ApprovalError> {
        let key = QueryKey::CanApprove(id.clone(), user_id.to_string());
        if let Some(CachedQuery::CanApprove(allowed)) = self.cache.get(&key) {
            return Ok(allowed);
        }

        let ticket = self.cache.ticket();
        let allowed = match self.find_request(id).await? {
            Some(request) => match self.find_workflow(&request.workflow_id).await? {
                Some(workflow) => approvals::can_approve(&request, &workflow, user_id),
                None => false,
            },
            None => false,
        };
        self.cache.insert(ticket, key, CachedQuery::CanApprove(allowed));
        Ok(allowed)
    }

    pub async fn approve(
        &self,
        id: &ApprovalId,
        actor: &ActorContext,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let outcome = self.transition(id, actor, ApprovalCommand::Approve { comment }).await?;
        Ok(outcome.request)
    }

    pub async fn approve_with_conditions(
        &self,
        id: &ApprovalId,
        actor: &ActorContext,
        conditions: String,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let command = ApprovalCommand::ApproveWithConditions { conditions, comment };
        let outcome = self.transition(id, actor, command).await?;
        Ok(outcome.request)
    }

    pub async fn reject(
        &self,
        id: &ApprovalId,
        actor: &ActorContext,
        comment: String,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let outcome = self.transition(id, actor, ApprovalCommand::Reject { comment }).await?;
        Ok(outcome.request)
    }

    pub async fn cancel(
        &self,
        id: &ApprovalId,
        actor: &ActorContext,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let outcome = self.transition(id, actor, ApprovalCommand::Cancel).await?;
        Ok(outcome.request)
    }

    pub async fn add_comment(
        &self,
        id: &ApprovalId,
        actor: &ActorContext,
        comment: String,
    ) -> Result<ApprovalAction, ApprovalError> {
        let outcome = self.transition(id, actor, ApprovalCommand::Comment { comment }).await?;
        Ok(outcome.action)
    }

    pub async fn submit_for_approval(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        workflow_id: &WorkflowId,
        actor: &ActorContext,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let entity = EntityRef::new(entity_type, entity_id.trim());
        let workflow = self.load_workflow(workflow_id).await?;

        if let Some(active) = self
            .approvals
            .find_active_for_entity(&entity)
            .await
            .map_err(|e| persistence("find_active_for_entity", e))?
        {
            let error = ApprovalError::AlreadyActive { entity, request_id: active.id.0 };
            self.log_rejected("submit", None, actor, &error);
            return Err(error);
        }

        let outcome = match self.engine.submit(&workflow, entity.clone(), &actor.user_id, Utc::now())
        {
            Ok(outcome) => outcome,
            Err(error) => {
                self.log_rejected("submit", None, actor, &error);
                return Err(error);
            }
        };

        if let Err(error) =
            self.approvals.insert_with_action(outcome.request.clone(), outcome.action.clone()).await
        {
            let error = match error {
                RepositoryError::Conflict(_) => self.losing_submit(&entity).await,
                other => persistence("insert_request", other),
            };
            self.log_rejected("submit", None, actor, &error);
            return Err(error);
        }

        let invalidated = self.cache.invalidate(&Mutation::Submit { entity: entity.clone() });
        self.audit.emit(AuditEvent::new(
            &actor.audit_context(Some(outcome.request.id.clone())),
            AuditDetail::RequestSubmitted {
                entity: entity.clone(),
                workflow_id: workflow.id.clone(),
            },
        ));
        info!(
            event_name = "approval.request.submitted",
            correlation_id = %actor.correlation_id,
            request_id = %outcome.request.id.0,
            actor_id = %actor.user_id,
            entity = %entity,
            workflow_id = %workflow.id.0,
            invalidated,
            "approval request submitted"
        );

        if let Some(notification) = outcome.notification {
            self.notifier.notify(notification);
        }
        Ok(outcome.request)
    }

    /// Another submit for `entity` won the unique-index race; report its request.
    async fn losing_submit(&self, entity: &EntityRef) -> ApprovalError {
        match self.approvals.find_active_for_entity(entity).await {
            Ok(Some(active)) => {
                ApprovalError::AlreadyActive { entity: entity.clone(), request_id: active.id.0 }
            }
            Ok(None) => ApprovalError::invalid_state(format!(
                "approval state of {entity} changed while submitting; retry"
            )),
            Err(error) => persistence("find_active_for_entity", error),
        }
    }

    pub async fn entity_status(
        &self,
        entity: &EntityRef,
        user_id: &str,
    ) -> Result<EntityApprovalStatus, ApprovalError> {
        let key = QueryKey::EntityStatus(entity.clone(), user_id.to_string());
        if let Some(CachedQuery::EntityStatus(status)) = self.cache.get(&key) {
            return Ok(status);
        }

        let ticket = self.cache.ticket();
        let active = self
            .approvals
            .find_active_for_entity(entity)
            .await
            .map_err(|e| persistence("find_active_for_entity", e))?;
        let latest = self
            .approvals
            .latest_for_entity(entity)
            .await
            .map_err(|e| persistence("latest_for_entity", e))?;

        let active_workflow = match &active {
            Some(request) => self.find_workflow(&request.workflow_id).await?,
            None => None,
        };
        let active_pair = active.as_ref().zip(active_workflow.as_ref());

        let status = EntityApprovalStatus::evaluate(entity.clone(), active_pair, latest.as_ref(), user_id);
        self.cache.insert(ticket, key, CachedQuery::EntityStatus(status.clone()));
        Ok(status)
    }

    pub async fn create_workflow(
        &self,
        new_workflow: NewWorkflow,
        actor: &ActorContext,
    ) -> Result<ApprovalWorkflow, ApprovalError> {
        let id = new_workflow
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("WF-{}", Uuid::new_v4().simple()));
        let steps = new_workflow
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| {
                let approvers: Vec<String> = step
                    .approver_ids
                    .iter()
                    .map(|approver| approver.trim().to_string())
                    .filter(|approver| !approver.is_empty())
                    .collect();
                WorkflowStep::new(index as u32 + 1, step.name.trim(), approvers)
            })
            .collect();

        let workflow = ApprovalWorkflow::new(
            WorkflowId(id),
            new_workflow.name.trim(),
            new_workflow.entity_type,
            steps,
        )?;

        self.workflows.insert(workflow.clone()).await.map_err(|error| match error {
            RepositoryError::Conflict(_) => ApprovalError::validation("id", "workflow id already exists"),
            other => persistence("insert_workflow", other),
        })?;

        self.audit.emit(AuditEvent::new(
            &actor.audit_context(None),
            AuditDetail::WorkflowCreated {
                workflow_id: workflow.id.clone(),
                steps: workflow.steps.len(),
            },
        ));
        info!(
            event_name = "workflow.created",
            correlation_id = %actor.correlation_id,
            actor_id = %actor.user_id,
            workflow_id = %workflow.id.0,
            "approval workflow created"
        );
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: &WorkflowId) -> Result<ApprovalWorkflow, ApprovalError> {
        self.load_workflow(id).await
    }

    pub async fn list_workflows(&self) -> Result<Vec<ApprovalWorkflow>, ApprovalError> {
        self.workflows.list().await.map_err(|e| persistence("list_workflows", e))
    }

    async fn transition(
        &self,
        id: &ApprovalId,
        actor: &ActorContext,
        command: ApprovalCommand,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let action = command.action_type();
        let request = self.load_request(id).await?;
        let workflow = self.load_workflow(&request.workflow_id).await?;
        let audit = actor.audit_context(Some(request.id.clone()));

        let outcome = self
            .engine
            .apply_with_audit(
                &request,
                &workflow,
                &actor.user_id,
                &command,
                Utc::now(),
                self.audit.as_ref(),
                &audit,
            )
            .map_err(|error| self.rejected(action.as_str(), Some(id), actor, error))?;

        let mutation = if outcome.changes_request() {
            self.approvals
                .commit_transition(outcome.request.clone(), outcome.action.clone(), request.version)
                .await
                .map_err(|error| match error {
                    RepositoryError::Conflict(_) => ApprovalError::invalid_state(
                        "request was changed by another reviewer",
                    ),
                    other => persistence("commit_transition", other),
                })
                .map_err(|error| self.rejected(action.as_str(), Some(id), actor, error))?;
            Mutation::Transition { request_id: id.clone(), entity: request.entity.clone() }
        } else {
            self.approvals
                .append_action(outcome.action.clone())
                .await
                .map_err(|e| persistence("append_action", e))
                .map_err(|error| self.rejected(action.as_str(), Some(id), actor, error))?;
            Mutation::Comment { request_id: id.clone() }
        };

        let invalidated = self.cache.invalidate(&mutation);
        info!(
            event_name = "approval.transition.applied",
            correlation_id = %actor.correlation_id,
            request_id = %id.0,
            actor_id = %actor.user_id,
            action = action.as_str(),
            from_status = request.status.as_str(),
            to_status = outcome.request.status.as_str(),
            current_step = outcome.request.current_step,
            invalidated,
            "approval transition applied"
        );

        // Only committed state produces notifications.
        if let Some(notification) = outcome.notification.clone() {
            self.notifier.notify(notification);
        }
        Ok(outcome)
    }

    fn rejected(
        &self,
        action: &str,
        request_id: Option<&ApprovalId>,
        actor: &ActorContext,
        error: ApprovalError,
    ) -> ApprovalError {
        self.log_rejected(action, request_id, actor, &error);
        error
    }

    fn log_rejected(
        &self,
        action: &str,
        request_id: Option<&ApprovalId>,
        actor: &ActorContext,
        error: &ApprovalError,
    ) {
        let request_id = request_id.map(|id| id.0.as_str()).unwrap_or("none");
        if matches!(error, ApprovalError::Persistence(_)) {
            error!(
                event_name = "approval.transition.rejected",
                correlation_id = %actor.correlation_id,
                request_id,
                actor_id = %actor.user_id,
                action,
                error_kind = error.kind(),
                error = %error,
                "approval transition failed"
            );
        } else {
            warn!(
                event_name = "approval.transition.rejected",
                correlation_id = %actor.correlation_id,
                request_id,
                actor_id = %actor.user_id,
                action,
                error_kind = error.kind(),
                error = %error,
                "approval transition rejected"
            );
        }
    }

    async fn find_request(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, ApprovalError> {
        self.approvals.find_by_id(id).await.map_err(|e| persistence("find_request", e))
    }

    async fn load_request(&self, id: &ApprovalId) -> Result<ApprovalRequest, ApprovalError> {
        self.find_request(id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("approval request", id.0.clone()))
    }

    async fn find_workflow(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, ApprovalError> {
        self.workflows.find_by_id(id).await.map_err(|e| persistence("find_workflow", e))
    }

    async fn load_workflow(&self, id: &WorkflowId) -> Result<ApprovalWorkflow, ApprovalError> {
        self.find_workflow(id).await?.ok_or_else(|| ApprovalError::not_found("workflow", id.0.clone()))
    }
}

fn persistence(operation: &'static str, error: RepositoryError) -> ApprovalError {
    error!(
        event_name = "approval.persistence.failed",
        operation,
        error = %error,
        "repository call failed"
    );
    ApprovalError::Persistence(error.to_string())
}

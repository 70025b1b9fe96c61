use std::collections::HashMap;

use tokio::sync::RwLock;

use sitegate_core::approvals::RequestFilter;
use sitegate_core::domain::approval::{ApprovalAction, ApprovalId, ApprovalRequest};
use sitegate_core::domain::entity::EntityRef;
use sitegate_core::domain::workflow::{ApprovalWorkflow, WorkflowId};

use super::{ApprovalRepository, RepositoryError, WorkflowRepository};

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<String, ApprovalWorkflow>>,
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        let mut listed: Vec<ApprovalWorkflow> = workflows.values().cloned().collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(listed)
    }

    async fn insert(&self, workflow: ApprovalWorkflow) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "workflow `{}` already exists",
                workflow.id.0
            )));
        }
        workflows.insert(workflow.id.0.clone(), workflow);
        Ok(())
    }
}

#[derive(Default)]
struct ApprovalState {
    requests: HashMap<String, ApprovalRequest>,
    actions: Vec<ApprovalAction>,
}

/// Keeps requests and history behind one lock so transitions stay atomic.
#[derive(Default)]
pub struct InMemoryApprovalRepository {
    state: RwLock<ApprovalState>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id.0).cloned())
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let state = self.state.read().await;
        let mut listed: Vec<ApprovalRequest> =
            state.requests.values().filter(|request| filter.matches(request)).cloned().collect();
        listed.sort_by(|a, b| b.initiated_at.cmp(&a.initiated_at).then_with(|| b.id.cmp(&a.id)));
        Ok(listed)
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let state = self.state.read().await;
        let mut pending: Vec<ApprovalRequest> =
            state.requests.values().filter(|request| request.is_pending()).cloned().collect();
        pending.sort_by(|a, b| a.initiated_at.cmp(&b.initiated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }

    async fn find_active_for_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .requests
            .values()
            .find(|request| request.is_pending() && &request.entity == entity)
            .cloned())
    }

    async fn latest_for_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .requests
            .values()
            .filter(|request| &request.entity == entity)
            .max_by(|a, b| a.initiated_at.cmp(&b.initiated_at).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn insert_with_action(
        &self,
        request: ApprovalRequest,
        action: ApprovalAction,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "approval request `{}` already exists",
                request.id.0
            )));
        }
        let active = request.is_pending()
            && state
                .requests
                .values()
                .any(|existing| existing.is_pending() && existing.entity == request.entity);
        if active {
            return Err(RepositoryError::Conflict(format!(
                "{} already has a pending approval request",
                request.entity
            )));
        }

        state.requests.insert(request.id.0.clone(), request);
        state.actions.push(action);
        Ok(())
    }

    async fn commit_transition(
        &self,
        request: ApprovalRequest,
        action: ApprovalAction,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let stored_version = state.requests.get(&request.id.0).map(|stored| stored.version);
        if stored_version != Some(expected_version) {
            return Err(RepositoryError::Conflict(format!(
                "approval request `{}` changed since version {expected_version}",
                request.id.0
            )));
        }

        state.requests.insert(request.id.0.clone(), request);
        state.actions.push(action);
        Ok(())
    }

    async fn append_action(&self, action: ApprovalAction) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if !state.requests.contains_key(&action.request_id.0) {
            return Err(RepositoryError::Decode(format!(
                "approval request `{}` does not exist",
                action.request_id.0
            )));
        }
        state.actions.push(action);
        Ok(())
    }

    async fn list_actions(
        &self,
        request_id: &ApprovalId,
    ) -> Result<Vec<ApprovalAction>, RepositoryError> {
        let state = self.state.read().await;
        let mut actions: Vec<ApprovalAction> = state
            .actions
            .iter()
            .filter(|action| &action.request_id == request_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        actions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use sitegate_core::approvals::{ApprovalCommand, ApprovalEngine};
    use sitegate_core::domain::approval::ApprovalStatus;
    use sitegate_core::domain::entity::{EntityRef, EntityType};
    use sitegate_core::domain::workflow::{ApprovalWorkflow, WorkflowId, WorkflowStep};

    use crate::repositories::{
        ApprovalRepository, InMemoryApprovalRepository, InMemoryWorkflowRepository,
        RepositoryError, WorkflowRepository,
    };

    fn workflow() -> ApprovalWorkflow {
        ApprovalWorkflow::new(
            WorkflowId("WF-1".to_string()),
            "Single",
            None,
            vec![WorkflowStep::new(1, "PM", ["pm"])],
        )
        .expect("workflow")
    }

    #[tokio::test]
    async fn in_memory_workflow_repo_round_trip() {
        let repo = InMemoryWorkflowRepository::default();
        let workflow = workflow();
        repo.insert(workflow.clone()).await.expect("insert");

        let found = repo.find_by_id(&workflow.id).await.expect("find");
        assert_eq!(found, Some(workflow.clone()));
        assert!(matches!(repo.insert(workflow).await, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn in_memory_approval_repo_enforces_version_and_single_active() {
        let repo = InMemoryApprovalRepository::default();
        let engine = ApprovalEngine::new();
        let workflow = workflow();
        let entity = EntityRef::new(EntityType::Document, "DOC-1");

        let submitted = engine.submit(&workflow, entity.clone(), "owner", Utc::now()).expect("submit");
        repo.insert_with_action(submitted.request.clone(), submitted.action.clone())
            .await
            .expect("insert");

        let duplicate = engine.submit(&workflow, entity.clone(), "owner", Utc::now()).expect("dup");
        assert!(matches!(
            repo.insert_with_action(duplicate.request, duplicate.action).await,
            Err(RepositoryError::Conflict(_))
        ));

        let approved = engine
            .apply(&submitted.request, &workflow, "pm", &ApprovalCommand::Approve { comment: None }, Utc::now())
            .expect("approve");
        repo.commit_transition(approved.request.clone(), approved.action.clone(), 1)
            .await
            .expect("commit");
        assert!(matches!(
            repo.commit_transition(approved.request, approved.action, 1).await,
            Err(RepositoryError::Conflict(_))
        ));

        let latest = repo.latest_for_entity(&entity).await.expect("latest").expect("exists");
        assert_eq!(latest.status, ApprovalStatus::Approved);
        assert!(repo.find_active_for_entity(&entity).await.expect("active").is_none());
        assert_eq!(repo.list_actions(&submitted.request.id).await.expect("history").len(), 2);
    }
}

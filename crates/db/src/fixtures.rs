use chrono::Utc;

use sitegate_core::approvals::ApprovalEngine;
use sitegate_core::domain::entity::{EntityRef, EntityType};
use sitegate_core::domain::workflow::{ApprovalWorkflow, WorkflowId, WorkflowStep};

use crate::connection::DbPool;
use crate::repositories::{
    ApprovalRepository, RepositoryError, SqlApprovalRepository, SqlWorkflowRepository,
    WorkflowRepository,
};

/// Demo workflows, one per entity type, used for local runs and smoke checks.
const SEED_WORKFLOWS: &[SeedWorkflowContract] = &[
    SeedWorkflowContract {
        id: "wf-document-review",
        name: "Document review",
        entity_type: EntityType::Document,
        steps: &[
            ("Document Controller", &["u-doc-control"]),
            ("Project Manager", &["u-pm"]),
        ],
    },
    SeedWorkflowContract {
        id: "wf-submittal-review",
        name: "Submittal review",
        entity_type: EntityType::Submittal,
        steps: &[
            ("Architect", &["u-architect"]),
            ("Structural Engineer", &["u-engineer", "u-engineer-2"]),
            ("Project Manager", &["u-pm"]),
        ],
    },
    SeedWorkflowContract {
        id: "wf-rfi-response",
        name: "RFI response sign-off",
        entity_type: EntityType::Rfi,
        steps: &[("Design Lead", &["u-architect"])],
    },
    SeedWorkflowContract {
        id: "wf-change-order",
        name: "Change order approval",
        entity_type: EntityType::ChangeOrder,
        steps: &[
            ("Project Manager", &["u-pm"]),
            ("Commercial Manager", &["u-commercial"]),
            ("Client Representative", &["u-client"]),
        ],
    },
];

/// One open request so the pending views are not empty after seeding.
const SEED_REQUEST: SeedRequestContract = SeedRequestContract {
    workflow_id: "wf-submittal-review",
    entity_type: EntityType::Submittal,
    entity_id: "SUB-0001",
    initiated_by: "u-site-engineer",
};

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// Loads the demo workflows and the sample request. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let workflows = SqlWorkflowRepository::new(pool.clone());
        let approvals = SqlApprovalRepository::new(pool.clone());

        let mut workflows_seeded = Vec::new();
        for contract in SEED_WORKFLOWS {
            let id = WorkflowId(contract.id.to_string());
            if workflows.find_by_id(&id).await?.is_none() {
                workflows.insert(contract.build()?).await?;
            }
            workflows_seeded.push(contract.id);
        }

        let entity = EntityRef::new(SEED_REQUEST.entity_type, SEED_REQUEST.entity_id);
        let mut requests_seeded = 0;
        if approvals.latest_for_entity(&entity).await?.is_none() {
            let workflow_id = WorkflowId(SEED_REQUEST.workflow_id.to_string());
            let workflow = workflows.find_by_id(&workflow_id).await?.ok_or_else(|| {
                RepositoryError::Decode(format!("seed workflow `{}` missing", workflow_id.0))
            })?;
            let outcome = ApprovalEngine::new()
                .submit(&workflow, entity, SEED_REQUEST.initiated_by, Utc::now())
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            approvals.insert_with_action(outcome.request, outcome.action).await?;
            requests_seeded = 1;
        }

        Ok(SeedResult { workflows_seeded, requests_seeded })
    }

    /// Checks that every seeded workflow exists with the expected step count.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let workflows = SqlWorkflowRepository::new(pool.clone());
        let approvals = SqlApprovalRepository::new(pool.clone());
        let mut checks = Vec::new();

        for contract in SEED_WORKFLOWS {
            let stored = workflows.find_by_id(&WorkflowId(contract.id.to_string())).await?;
            let matches = stored.is_some_and(|workflow| {
                workflow.steps.len() == contract.steps.len()
                    && workflow.entity_type == Some(contract.entity_type)
            });
            checks.push((contract.id, matches));
        }

        let entity = EntityRef::new(SEED_REQUEST.entity_type, SEED_REQUEST.entity_id);
        let has_request = approvals.latest_for_entity(&entity).await?.is_some();
        checks.push(("sample-submittal-request", has_request));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes seeded rows, history first.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        for contract in SEED_WORKFLOWS {
            sqlx::query(
                "DELETE FROM approval_action
                 WHERE request_id IN (SELECT id FROM approval_request WHERE workflow_id = ?)",
            )
            .bind(contract.id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM approval_request WHERE workflow_id = ?")
                .bind(contract.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM approval_workflow WHERE id = ?")
                .bind(contract.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedWorkflowContract {
    id: &'static str,
    name: &'static str,
    entity_type: EntityType,
    steps: &'static [(&'static str, &'static [&'static str])],
}

impl SeedWorkflowContract {
    fn build(&self) -> Result<ApprovalWorkflow, RepositoryError> {
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(index, (name, approvers))| {
                WorkflowStep::new(index as u32 + 1, *name, approvers.iter().copied())
            })
            .collect();

        ApprovalWorkflow::new(
            WorkflowId(self.id.to_string()),
            self.name,
            Some(self.entity_type),
            steps,
        )
        .map_err(|error| RepositoryError::Decode(error.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedRequestContract {
    workflow_id: &'static str,
    entity_type: EntityType,
    entity_id: &'static str,
    initiated_by: &'static str,
}

#[derive(Debug)]
pub struct SeedResult {
    pub workflows_seeded: Vec<&'static str>,
    pub requests_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

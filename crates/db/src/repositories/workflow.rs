use std::collections::BTreeSet;

use sqlx::{sqlite::SqliteRow, Row};

use sitegate_core::domain::entity::EntityType;
use sitegate_core::domain::workflow::{ApprovalWorkflow, WorkflowId, WorkflowStep};

use super::{parse_timestamp, parse_u32, RepositoryError, WorkflowRepository};
use crate::DbPool;

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_steps(&self, workflow_id: &str) -> Result<Vec<WorkflowStep>, RepositoryError> {
        let step_rows = sqlx::query(
            "SELECT step_order, name
             FROM approval_workflow_step
             WHERE workflow_id = ?
             ORDER BY step_order ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        let approver_rows = sqlx::query(
            "SELECT step_order, approver_id
             FROM approval_workflow_step_approver
             WHERE workflow_id = ?
             ORDER BY step_order ASC, approver_id ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        let mut steps = Vec::with_capacity(step_rows.len());
        for row in &step_rows {
            let step_order = parse_u32("step_order", row.try_get("step_order")?)?;
            steps.push(WorkflowStep {
                step_order,
                name: row.try_get("name")?,
                approver_ids: BTreeSet::new(),
            });
        }

        for row in &approver_rows {
            let step_order = parse_u32("step_order", row.try_get("step_order")?)?;
            let approver_id: String = row.try_get("approver_id")?;
            let step = steps.iter_mut().find(|step| step.step_order == step_order).ok_or_else(|| {
                RepositoryError::Decode(format!(
                    "approver `{approver_id}` references missing step {step_order} of `{workflow_id}`"
                ))
            })?;
            step.approver_ids.insert(approver_id);
        }

        Ok(steps)
    }

    async fn hydrate(&self, row: SqliteRow) -> Result<ApprovalWorkflow, RepositoryError> {
        let id: String = row.try_get("id")?;
        let entity_type = row
            .try_get::<Option<String>, _>("entity_type")?
            .map(|value| {
                EntityType::parse(&value)
                    .ok_or_else(|| RepositoryError::Decode(format!("unknown entity type `{value}`")))
            })
            .transpose()?;

        let workflow = ApprovalWorkflow {
            steps: self.load_steps(&id).await?,
            id: WorkflowId(id),
            name: row.try_get("name")?,
            entity_type,
            created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        };
        workflow.validate().map_err(|error| {
            RepositoryError::Decode(format!("stored workflow `{}` is invalid: {error}", workflow.id.0))
        })?;
        Ok(workflow)
    }
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, entity_type, created_at FROM approval_workflow WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, entity_type, created_at
             FROM approval_workflow
             ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            workflows.push(self.hydrate(row).await?);
        }
        Ok(workflows)
    }

    async fn insert(&self, workflow: ApprovalWorkflow) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_workflow (id, name, entity_type, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.name)
        .bind(workflow.entity_type.map(|entity_type| entity_type.as_str()))
        .bind(workflow.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            RepositoryError::from_write(error, || {
                format!("workflow `{}` already exists", workflow.id.0)
            })
        })?;

        for step in &workflow.steps {
            sqlx::query(
                "INSERT INTO approval_workflow_step (workflow_id, step_order, name) VALUES (?, ?, ?)",
            )
            .bind(&workflow.id.0)
            .bind(i64::from(step.step_order))
            .bind(&step.name)
            .execute(&mut *tx)
            .await?;

            for approver_id in &step.approver_ids {
                sqlx::query(
                    "INSERT INTO approval_workflow_step_approver (workflow_id, step_order, approver_id)
                     VALUES (?, ?, ?)",
                )
                .bind(&workflow.id.0)
                .bind(i64::from(step.step_order))
                .bind(approver_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

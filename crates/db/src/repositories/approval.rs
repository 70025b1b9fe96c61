use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use sitegate_core::approvals::RequestFilter;
use sitegate_core::domain::approval::{
    ActionId, ActionType, ApprovalAction, ApprovalId, ApprovalRequest, ApprovalStatus,
};
use sitegate_core::domain::entity::{EntityRef, EntityType};
use sitegate_core::domain::workflow::WorkflowId;

use super::{
    parse_optional_timestamp, parse_timestamp, parse_u32, ApprovalRepository, RepositoryError,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, workflow_id, entity_type, entity_id, status, current_step,
    initiated_by, initiated_at, conditions, resolved_at, updated_at, version";

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(request_from_row).transpose()
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = if let Some(initiated_by) = &filter.initiated_by {
            sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM approval_request
                 WHERE initiated_by = ?
                 ORDER BY initiated_at DESC, id DESC"
            ))
            .bind(initiated_by)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM approval_request
                 ORDER BY initiated_at DESC, id DESC"
            ))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(request_from_row).collect()
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE status = 'pending'
             ORDER BY initiated_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(request_from_row).collect()
    }

    async fn find_active_for_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE entity_type = ? AND entity_id = ? AND status = 'pending'"
        ))
        .bind(entity.entity_type.as_str())
        .bind(&entity.entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(request_from_row).transpose()
    }

    async fn latest_for_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE entity_type = ? AND entity_id = ?
             ORDER BY initiated_at DESC, id DESC
             LIMIT 1"
        ))
        .bind(entity.entity_type.as_str())
        .bind(&entity.entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(request_from_row).transpose()
    }

    async fn insert_with_action(
        &self,
        request: ApprovalRequest,
        action: ApprovalAction,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_request (
                id, workflow_id, entity_type, entity_id, status, current_step,
                initiated_by, initiated_at, conditions, resolved_at, updated_at, version
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.workflow_id.0)
        .bind(request.entity.entity_type.as_str())
        .bind(&request.entity.entity_id)
        .bind(request.status.as_str())
        .bind(i64::from(request.current_step))
        .bind(&request.initiated_by)
        .bind(request.initiated_at.to_rfc3339())
        .bind(&request.conditions)
        .bind(request.resolved_at.map(|timestamp| timestamp.to_rfc3339()))
        .bind(request.updated_at.to_rfc3339())
        .bind(i64::from(request.version))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            RepositoryError::from_write(error, || {
                format!("{} already has a pending approval request", request.entity)
            })
        })?;

        insert_action(&mut tx, &action).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn commit_transition(
        &self,
        request: ApprovalRequest,
        action: ApprovalAction,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE approval_request
             SET status = ?, current_step = ?, conditions = ?, resolved_at = ?,
                 updated_at = ?, version = ?
             WHERE id = ? AND version = ?",
        )
        .bind(request.status.as_str())
        .bind(i64::from(request.current_step))
        .bind(&request.conditions)
        .bind(request.resolved_at.map(|timestamp| timestamp.to_rfc3339()))
        .bind(request.updated_at.to_rfc3339())
        .bind(i64::from(request.version))
        .bind(&request.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "approval request `{}` changed since version {expected_version}",
                request.id.0
            )));
        }

        insert_action(&mut tx, &action).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn append_action(&self, action: ApprovalAction) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_action(&mut tx, &action).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_actions(
        &self,
        request_id: &ApprovalId,
    ) -> Result<Vec<ApprovalAction>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, actor_id, action_type, comment, conditions, step_order, timestamp
             FROM approval_action
             WHERE request_id = ?
             ORDER BY timestamp ASC, seq ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(action_from_row).collect()
    }
}

async fn insert_action(
    tx: &mut Transaction<'_, Sqlite>,
    action: &ApprovalAction,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_action (
            id, request_id, actor_id, action_type, comment, conditions, step_order, timestamp, seq
         ) VALUES (
            ?, ?, ?, ?, ?, ?, ?, ?,
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM approval_action WHERE request_id = ?)
         )",
    )
    .bind(&action.id.0)
    .bind(&action.request_id.0)
    .bind(&action.actor_id)
    .bind(action.action_type.as_str())
    .bind(&action.comment)
    .bind(&action.conditions)
    .bind(i64::from(action.step_order))
    .bind(action.timestamp.to_rfc3339())
    .bind(&action.request_id.0)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn request_from_row(row: SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let entity_type_raw = row.try_get::<String, _>("entity_type")?;
    let entity_type = EntityType::parse(&entity_type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown entity type `{entity_type_raw}`"))
    })?;
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{status_raw}`")))?;

    Ok(ApprovalRequest {
        id: ApprovalId(row.try_get("id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        entity: EntityRef::new(entity_type, row.try_get::<String, _>("entity_id")?),
        status,
        current_step: parse_u32("current_step", row.try_get("current_step")?)?,
        initiated_by: row.try_get("initiated_by")?,
        initiated_at: parse_timestamp("initiated_at", row.try_get("initiated_at")?)?,
        conditions: row.try_get("conditions")?,
        resolved_at: parse_optional_timestamp("resolved_at", row.try_get("resolved_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        version: parse_u32("version", row.try_get("version")?)?,
    })
}

fn action_from_row(row: SqliteRow) -> Result<ApprovalAction, RepositoryError> {
    let action_type_raw = row.try_get::<String, _>("action_type")?;
    let action_type = ActionType::parse(&action_type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action type `{action_type_raw}`")))?;

    Ok(ApprovalAction {
        id: ActionId(row.try_get("id")?),
        request_id: ApprovalId(row.try_get("request_id")?),
        actor_id: row.try_get("actor_id")?,
        action_type,
        comment: row.try_get("comment")?,
        conditions: row.try_get("conditions")?,
        step_order: parse_u32("step_order", row.try_get("step_order")?)?,
        timestamp: parse_timestamp("timestamp", row.try_get("timestamp")?)?,
    })
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use sitegate_core::approvals::RequestFilter;
use sitegate_core::domain::approval::{ApprovalAction, ApprovalId, ApprovalRequest};
use sitegate_core::domain::entity::EntityRef;
use sitegate_core::domain::workflow::{ApprovalWorkflow, WorkflowId};

pub mod approval;
pub mod memory;
pub mod workflow;

pub use approval::SqlApprovalRepository;
pub use memory::{InMemoryApprovalRepository, InMemoryWorkflowRepository};
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// A uniqueness rule or a version check failed; the caller lost a race.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub(crate) fn from_write(error: sqlx::Error, conflict: impl FnOnce() -> String) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict(conflict()),
            _ => Self::Database(error),
        }
    }
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find_by_id(&self, id: &WorkflowId)
        -> Result<Option<ApprovalWorkflow>, RepositoryError>;
    async fn list(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError>;
    /// Inserts a new workflow. Workflows are immutable once stored.
    async fn insert(&self, workflow: ApprovalWorkflow) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;

    /// Newest first.
    async fn list(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    /// Every pending request, oldest first.
    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    async fn find_active_for_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn latest_for_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRequest>, RepositoryError>;

    /// Stores a new request with its `submit` action. `Conflict` when the
    /// entity already has a pending request.
    async fn insert_with_action(
        &self,
        request: ApprovalRequest,
        action: ApprovalAction,
    ) -> Result<(), RepositoryError>;

    /// Writes the new request state and its history action atomically, only if
    /// the stored version still equals `expected_version`.
    async fn commit_transition(
        &self,
        request: ApprovalRequest,
        action: ApprovalAction,
        expected_version: u32,
    ) -> Result<(), RepositoryError>;

    async fn append_action(&self, action: ApprovalAction) -> Result<(), RepositoryError>;

    /// Oldest first.
    async fn list_actions(
        &self,
        request_id: &ApprovalId,
    ) -> Result<Vec<ApprovalAction>, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {error}")),
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

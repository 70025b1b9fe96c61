use std::sync::Arc;

use sitegate_core::audit::TracingAuditSink;
use sitegate_core::cache::QueryCache;
use sitegate_core::config::{AppConfig, ConfigError, LoadOptions};
use sitegate_core::notify::TracingNotifier;
use sitegate_db::{
    connect_with_settings, migrations, DbPool, SqlApprovalRepository, SqlWorkflowRepository,
};
use thiserror::Error;
use tracing::info;

use crate::service::ApprovalService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: ApprovalService,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let service = ApprovalService::new(
        Arc::new(SqlWorkflowRepository::new(db_pool.clone())),
        Arc::new(SqlApprovalRepository::new(db_pool.clone())),
        Arc::new(TracingNotifier),
        Arc::new(TracingAuditSink),
        QueryCache::bounded(config.cache.enabled, config.cache.max_entries),
    );
    info!(
        event_name = "system.bootstrap.service_ready",
        correlation_id = "bootstrap",
        cache_enabled = config.cache.enabled,
        cache_max_entries = config.cache.max_entries,
        "approval service ready"
    );

    Ok(Application { config, db_pool, service })
}

#[cfg(test)]
mod tests {
    use sitegate_core::config::{ConfigOverrides, LoadOptions};
    use sitegate_core::domain::approval::ApprovalStatus;
    use sitegate_core::domain::entity::EntityType;
    use sitegate_core::domain::workflow::WorkflowId;

    use crate::bootstrap::bootstrap;
    use crate::service::{ActorContext, NewWorkflow, NewWorkflowStep};

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_non_sqlite_database_url() {
        let result = bootstrap(overrides("postgres://localhost/sitegate")).await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_applies_schema_and_serves_the_approval_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("sitegate.db").display());
        let app = bootstrap(overrides(&url))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('approval_workflow', 'approval_request', 'approval_action')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected approval tables to be available after bootstrap");
        assert_eq!(table_count, 3);

        let admin = ActorContext::new("admin");
        app.service
            .create_workflow(
                NewWorkflow {
                    id: Some("WF-DOC".to_string()),
                    name: "Document review".to_string(),
                    entity_type: Some(EntityType::Document),
                    steps: vec![NewWorkflowStep {
                        name: "Document Controller".to_string(),
                        approver_ids: vec!["controller".to_string()],
                    }],
                },
                &admin,
            )
            .await
            .expect("create workflow");

        let request = app
            .service
            .submit_for_approval(
                EntityType::Document,
                "DOC-100",
                &WorkflowId("WF-DOC".to_string()),
                &ActorContext::new("author"),
            )
            .await
            .expect("submit");
        let approved = app
            .service
            .approve(&request.id, &ActorContext::new("controller"), None)
            .await
            .expect("approve");
        assert_eq!(approved.status, ApprovalStatus::Approved);

        app.db_pool.close().await;
    }
}

use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Versions recorded as applied, oldest first.
pub async fn applied_versions(pool: &DbPool) -> Result<Vec<i64>, sqlx::Error> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if exists == 0 {
        return Ok(Vec::new());
    }

    sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version")
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{applied_versions, run_pending};
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "approval_workflow",
        "approval_workflow_step",
        "approval_workflow_step_approver",
        "approval_request",
        "approval_action",
        "idx_approval_request_active_entity",
        "idx_approval_request_status",
        "idx_approval_request_initiated_by",
        "idx_approval_request_entity",
        "idx_approval_action_request_id",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, name: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in ["approval_workflow", "approval_workflow_step", "approval_request", "approval_action"] {
            assert_eq!(table_count(&pool, table).await, 1, "missing table {table}");
        }
        assert_eq!(applied_versions(&pool).await.expect("versions"), vec![1]);
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert_eq!(table_count(&pool, "approval_request").await, 0);
        assert!(applied_versions(&pool).await.expect("versions").is_empty());
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    #[tokio::test]
    async fn pending_index_blocks_second_active_request_for_entity() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query("INSERT INTO approval_workflow (id, name, entity_type, created_at) VALUES ('WF-1', 'Review', NULL, '2026-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .expect("insert workflow");

        let insert = "INSERT INTO approval_request
            (id, workflow_id, entity_type, entity_id, status, current_step, initiated_by,
             initiated_at, updated_at, version)
            VALUES (?, 'WF-1', 'rfi', 'RFI-1', ?, 1, 'owner', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', 1)";

        sqlx::query(insert).bind("APR-1").bind("cancelled").execute(&pool).await.expect("resolved");
        sqlx::query(insert).bind("APR-2").bind("pending").execute(&pool).await.expect("first pending");
        let duplicate = sqlx::query(insert).bind("APR-3").bind("pending").execute(&pool).await;

        assert!(duplicate.is_err(), "second pending request must violate the partial index");
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}

use serde_json::json;
use sitegate_db::{connect_with_settings, migrations, ping};

use crate::commands::{build_runtime, load_config, CommandResult};

/// Preflight for `sitegate-server`: config, database reachability, and schema
/// status. Does not apply migrations.
pub fn run() -> CommandResult {
    let config = match load_config("start") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("start") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        ping(&pool).await.map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let applied = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(applied.len())
    });

    match result {
        Ok(applied) => {
            let known = migrations::MIGRATOR
                .iter()
                .filter(|migration| !migration.migration_type.is_down_migration())
                .count();
            let pending = known.saturating_sub(applied);
            let message = if pending == 0 {
                format!("preflight passed; server would listen on {}", config.listen_address())
            } else {
                format!(
                    "preflight passed with {pending} pending migration(s); they are applied on server start or via `sitegate migrate`"
                )
            };
            CommandResult::success_with_details(
                "start",
                message,
                Some(json!({
                    "listen_address": config.listen_address(),
                    "migrations_applied": applied,
                    "migrations_pending": pending,
                    "cache_enabled": config.cache.enabled,
                    "api_token_configured": config.server.api_token.is_some(),
                })),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("start", error_class, message, exit_code)
        }
    }
}

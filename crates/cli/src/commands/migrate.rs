use crate::commands::{build_runtime, load_config, CommandResult};
use sitegate_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("migrate") {
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

        let before = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let after = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        pool.close().await;
        let newly_applied = after.len().saturating_sub(before.len());
        Ok::<(usize, usize), (&'static str, String, u8)>((newly_applied, after.len()))
    });

    match result {
        Ok((newly_applied, total)) => CommandResult::success(
            "migrate",
            format!("applied {newly_applied} pending migration(s); {total} total"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

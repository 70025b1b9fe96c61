use serde_json::json;
use sitegate_db::{connect_with_settings, migrations, DemoSeedDataset, SeedResult};

use crate::commands::{build_runtime, load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("seed") {
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

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedResult, (&'static str, String, u8)> = if verification.all_present {
            Ok(seed_result)
        } else {
            Err(("seed_verification", verification_failure_message(&verification.checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success_with_details(
            "seed",
            summary(&seeded),
            Some(json!({
                "workflows": seeded.workflows_seeded,
                "requests_created": seeded.requests_seeded,
            })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    let workflows: Vec<String> =
        seeded.workflows_seeded.iter().map(|workflow| format!("  - {workflow}")).collect();
    format!("demo approval workflows ready:\n{}", workflows.join("\n"))
}

fn verification_failure_message(checks: &[(&str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();

    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

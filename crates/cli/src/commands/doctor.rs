use serde::Serialize;
use sitegate_core::config::{AppConfig, LoadOptions};
use sitegate_db::{connect_with_settings, migrations, ping};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 1 when any check fails; warnings still exit 0.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_api_token(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["api_token", "database_connectivity", "schema_migrations"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let overall_status = overall(&checks);
    let summary = match overall_status {
        CheckStatus::Pass => "doctor: all readiness checks passed",
        CheckStatus::Warn => "doctor: ready, with warnings",
        _ => "doctor: one or more readiness checks failed",
    }
    .to_string();

    DoctorReport { overall_status, summary, checks }
}

fn overall(checks: &[DoctorCheck]) -> CheckStatus {
    if checks.iter().any(|check| matches!(check.status, CheckStatus::Fail | CheckStatus::Skipped)) {
        CheckStatus::Fail
    } else if checks.iter().any(|check| check.status == CheckStatus::Warn) {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    }
}

fn check_api_token(config: &AppConfig) -> DoctorCheck {
    match config.server.api_token {
        Some(_) => DoctorCheck {
            name: "api_token",
            status: CheckStatus::Pass,
            details: "bearer token required on API calls".to_string(),
        },
        None => DoctorCheck {
            name: "api_token",
            status: CheckStatus::Warn,
            details: "server.api_token unset; API trusts the x-user-id header from any caller"
                .to_string(),
        },
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;
        ping(&pool).await.map_err(|error| format!("database query failed: {error}"))?;
        let applied = migrations::applied_versions(&pool).await.map_err(|error| error.to_string());

        pool.close().await;
        Ok::<_, String>(applied)
    });

    match result {
        Ok(applied) => vec![
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            check_schema(applied),
        ],
        Err(error) => vec![
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error },
            DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Skipped,
                details: "skipped because the database is unreachable".to_string(),
            },
        ],
    }
}

fn check_schema(applied: Result<Vec<i64>, String>) -> DoctorCheck {
    let known = migrations::MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .count();

    match applied {
        Ok(applied) if applied.len() >= known => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Pass,
            details: format!("{} migration(s) applied", applied.len()),
        },
        Ok(applied) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Warn,
            details: format!(
                "{} of {known} migration(s) applied; run `sitegate migrate`",
                applied.len()
            ),
        },
        Err(error) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("could not read migration history: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{overall, render_human, CheckStatus, DoctorCheck, DoctorReport};

    fn check(name: &'static str, status: CheckStatus) -> DoctorCheck {
        DoctorCheck { name, status, details: "detail".to_string() }
    }

    #[test]
    fn warnings_do_not_fail_the_report() {
        let checks =
            vec![check("config_validation", CheckStatus::Pass), check("api_token", CheckStatus::Warn)];
        assert_eq!(overall(&checks), CheckStatus::Warn);
    }

    #[test]
    fn skipped_checks_fail_the_report() {
        let checks = vec![
            check("config_validation", CheckStatus::Fail),
            check("database_connectivity", CheckStatus::Skipped),
        ];
        assert_eq!(overall(&checks), CheckStatus::Fail);
    }

    #[test]
    fn human_output_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Warn,
            summary: "doctor: ready, with warnings".to_string(),
            checks: vec![check("api_token", CheckStatus::Warn)],
        };

        assert_eq!(render_human(&report), "doctor: ready, with warnings\n- [warn] api_token: detail");
    }
}

use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use sitegate_cli::commands::{doctor, migrate, seed, start};

#[test]
fn start_returns_success_with_valid_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SITEGATE_DATABASE_URL", url.as_str())], || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["migrations_applied"], 0);
        assert_eq!(payload["details"]["migrations_pending"], 1);
    });
}

#[test]
fn start_returns_config_failure_for_unsupported_database() {
    with_env(&[("SITEGATE_DATABASE_URL", "postgres://localhost/sitegate")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn migrate_applies_once_then_reports_nothing_pending() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SITEGATE_DATABASE_URL", url.as_str())], || {
        let first = migrate::run();
        assert_eq!(first.exit_code, 0, "expected successful migrate run");
        let payload = parse_payload(&first.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied 1 pending migration(s); 1 total");

        let second = migrate::run();
        let payload = parse_payload(&second.output);
        assert_eq!(payload["message"], "applied 0 pending migration(s); 1 total");

        let preflight = parse_payload(&start::run().output);
        assert_eq!(preflight["details"]["migrations_pending"], 0);
    });
}

#[test]
fn seed_loads_demo_workflows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SITEGATE_DATABASE_URL", url.as_str())], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["requests_created"], 1);

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("  - wf-document-review"));
        assert!(message.contains("  - wf-submittal-review"));
        assert!(message.contains("  - wf-rfi-response"));
        assert!(message.contains("  - wf-change-order"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SITEGATE_DATABASE_URL", url.as_str())], || {
        let first = parse_payload(&seed::run().output);
        let second = parse_payload(&seed::run().output);

        assert_eq!(first["status"], "ok");
        assert_eq!(second["status"], "ok");
        assert_eq!(first["message"], second["message"]);
        assert_eq!(second["details"]["requests_created"], 0);
    });
}

#[test]
fn doctor_reports_checks_as_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("SITEGATE_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "warn");
        let checks = report["checks"].as_array().cloned().unwrap_or_default();
        let names: Vec<&str> = checks.iter().filter_map(|check| check["name"].as_str()).collect();
        assert_eq!(
            names,
            vec!["config_validation", "api_token", "database_connectivity", "schema_migrations"]
        );
        assert_eq!(checks[3]["status"], "pass");
    });
}

#[test]
fn doctor_fails_when_config_invalid() {
    with_env(&[("SITEGATE_SERVER_PORT", "eighty")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][1]["status"], "skipped");
    });
}

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("sitegate.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SITEGATE_DATABASE_URL",
        "SITEGATE_DATABASE_MAX_CONNECTIONS",
        "SITEGATE_DATABASE_TIMEOUT_SECS",
        "SITEGATE_SERVER_BIND_ADDRESS",
        "SITEGATE_SERVER_PORT",
        "SITEGATE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SITEGATE_SERVER_API_TOKEN",
        "SITEGATE_CACHE_ENABLED",
        "SITEGATE_LOGGING_LEVEL",
        "SITEGATE_LOGGING_FORMAT",
        "SITEGATE_LOG_LEVEL",
        "SITEGATE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

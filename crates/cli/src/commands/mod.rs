pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod start;

use serde::Serialize;
use serde_json::Value;
use sitegate_core::config::{AppConfig, LoadOptions};
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_details(command, message, None)
    }

    pub fn success_with_details(
        command: &str,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// Exit code 2.
pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

/// Exit code 3.
pub(crate) fn build_runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::CommandResult;

    #[test]
    fn failure_payload_carries_error_class() {
        let result = CommandResult::failure("migrate", "db_connectivity", "no such file", 4);
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 4);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "db_connectivity");
        assert!(payload.get("details").is_none());
    }

    #[test]
    fn success_payload_includes_details_when_present() {
        let result =
            CommandResult::success_with_details("seed", "loaded", Some(json!({ "workflows": 4 })));
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 0);
        assert_eq!(payload["error_class"], Value::Null);
        assert_eq!(payload["details"]["workflows"], 4);
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use sitegate_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_PATHS};
use toml::Value;

/// One reported setting: dotted key, rendered value, and the env vars that can
/// override it (first match wins).
struct Field<'a> {
    key: &'static str,
    value: String,
    env_keys: &'a [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        lines.push(render_line(
            field.key,
            &field.value,
            field_source(
                field.key,
                field.env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        ));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field<'static>> {
    let api_token = match &config.server.api_token {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };

    vec![
        Field {
            key: "database.url",
            value: config.database.url.clone(),
            env_keys: &["SITEGATE_DATABASE_URL"],
        },
        Field {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["SITEGATE_DATABASE_MAX_CONNECTIONS"],
        },
        Field {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["SITEGATE_DATABASE_TIMEOUT_SECS"],
        },
        Field {
            key: "server.bind_address",
            value: config.server.bind_address.clone(),
            env_keys: &["SITEGATE_SERVER_BIND_ADDRESS"],
        },
        Field {
            key: "server.port",
            value: config.server.port.to_string(),
            env_keys: &["SITEGATE_SERVER_PORT"],
        },
        Field {
            key: "server.graceful_shutdown_secs",
            value: config.server.graceful_shutdown_secs.to_string(),
            env_keys: &["SITEGATE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        },
        Field { key: "server.api_token", value: api_token, env_keys: &["SITEGATE_SERVER_API_TOKEN"] },
        Field {
            key: "cache.enabled",
            value: config.cache.enabled.to_string(),
            env_keys: &["SITEGATE_CACHE_ENABLED"],
        },
        Field {
            key: "cache.max_entries",
            value: config.cache.max_entries.to_string(),
            env_keys: &["SITEGATE_CACHE_MAX_ENTRIES"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["SITEGATE_LOGGING_LEVEL", "SITEGATE_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: config.logging.format.as_str().to_string(),
            env_keys: &["SITEGATE_LOGGING_FORMAT", "SITEGATE_LOG_FORMAT"],
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first four characters so operators can tell tokens apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let prefix: String = trimmed.chars().take(4).collect();
    format!("{prefix}***")
}

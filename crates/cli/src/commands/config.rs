use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bankdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: [(&str, String, &[&str]); 11] = [
        ("database.url", config.database.url.clone(), &["BANKDESK_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["BANKDESK_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["BANKDESK_DATABASE_TIMEOUT_SECS"],
        ),
        ("model.timeout_secs", config.model.timeout_secs.to_string(), &["BANKDESK_MODEL_TIMEOUT_SECS"]),
        (
            "model.max_tool_iterations",
            config.model.max_tool_iterations.to_string(),
            &["BANKDESK_MODEL_MAX_TOOL_ITERATIONS"],
        ),
        (
            "routing.default_label",
            config.routing.default_label.to_string(),
            &["BANKDESK_ROUTING_DEFAULT_LABEL"],
        ),
        ("server.bind_address", config.server.bind_address.clone(), &["BANKDESK_SERVER_BIND_ADDRESS"]),
        ("server.port", config.server.port.to_string(), &["BANKDESK_SERVER_PORT"]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["BANKDESK_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        ("logging.level", config.logging.level.clone(), &["BANKDESK_LOGGING_LEVEL", "BANKDESK_LOG_LEVEL"]),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["BANKDESK_LOGGING_FORMAT", "BANKDESK_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("bankdesk.toml"), PathBuf::from("config/bankdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
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

#[cfg(test)]
mod tests {
    use super::{contains_path, field_source};

    #[test]
    fn nested_keys_are_found_in_the_config_document() {
        let doc: toml::Value = "[model]\nmax_tool_iterations = 4\n".parse().expect("toml");

        assert!(contains_path(&doc, "model.max_tool_iterations"));
        assert!(!contains_path(&doc, "model.timeout_secs"));
        assert_eq!(
            field_source("model.max_tool_iterations", &["BANKDESK_TEST_UNSET_KEY"], Some(&doc), None),
            "file (config file)"
        );
        assert_eq!(field_source("server.port", &["BANKDESK_TEST_UNSET_KEY"], Some(&doc), None), "default");
    }
}

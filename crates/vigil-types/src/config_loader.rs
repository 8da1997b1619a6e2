//! Configuration loading with environment overrides.
//!
//! The priority chain (later overrides earlier):
//! 1. Built-in defaults ([`VigilConfig::default()`])
//! 2. The TOML file passed on the command line, if any
//! 3. `VIGIL_*` environment variables
//!
//! Nested fields use a double underscore (`VIGIL_SERVER__LISTEN`).

use std::path::Path;

use crate::config::VigilConfig;
use crate::VigilError;

/// Maximum config file size in bytes. Larger files are rejected to prevent
/// resource exhaustion from corrupted configs.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// How a field is written into the TOML tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    String,
    Integer,
}

/// Maps an environment variable to a TOML field path.
struct EnvMapping {
    env_var: &'static str,
    toml_path: &'static [&'static str],
    kind: ValueKind,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        env_var: "VIGIL_LEDGER_PATH",
        toml_path: &["ledger_path"],
        kind: ValueKind::String,
    },
    EnvMapping {
        env_var: "VIGIL_SERVER__LISTEN",
        toml_path: &["server", "listen"],
        kind: ValueKind::String,
    },
    EnvMapping {
        env_var: "VIGIL_AUTH__PRODUCER_SECRET",
        toml_path: &["auth", "producer_secret"],
        kind: ValueKind::String,
    },
    EnvMapping {
        env_var: "VIGIL_AUTH__SESSION_SECRET",
        toml_path: &["auth", "session_secret"],
        kind: ValueKind::String,
    },
    EnvMapping {
        env_var: "VIGIL_EXECUTION__AUTO_STOP_THRESHOLD",
        toml_path: &["execution", "auto_stop_threshold"],
        kind: ValueKind::String,
    },
    EnvMapping {
        env_var: "VIGIL_INGEST__MESSAGES_PER_SECOND",
        toml_path: &["ingest", "messages_per_second"],
        kind: ValueKind::Integer,
    },
];

impl VigilConfig {
    /// Load from an optional file, then apply `VIGIL_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, VigilError> {
        load_with_env(path, |name| std::env::var(name).ok())
    }
}

/// Like [`VigilConfig::load`], with an injectable environment lookup.
pub fn load_with_env(
    path: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<VigilConfig, VigilError> {
    let mut tree = match path {
        Some(path) => read_toml_file(path)?,
        None => toml::Value::Table(toml::map::Map::new()),
    };

    apply_env_overrides(&mut tree, &lookup)?;

    let mut config: VigilConfig = tree
        .try_into()
        .map_err(|e: toml::de::Error| VigilError::ConfigError(e.to_string()))?;
    config.fill_defaults();
    Ok(config)
}

fn read_toml_file(path: &Path) -> Result<toml::Value, VigilError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        VigilError::ConfigError(format!("cannot read config {}: {e}", path.display()))
    })?;
    if meta.len() > MAX_CONFIG_FILE_SIZE {
        return Err(VigilError::ConfigError(format!(
            "config {} is {} bytes, limit is {MAX_CONFIG_FILE_SIZE}",
            path.display(),
            meta.len()
        )));
    }
    let content = std::fs::read_to_string(path).map_err(|e| {
        VigilError::ConfigError(format!("cannot read config {}: {e}", path.display()))
    })?;
    content
        .parse::<toml::Value>()
        .map_err(|e| VigilError::ConfigError(format!("invalid TOML in {}: {e}", path.display())))
}

fn apply_env_overrides(
    tree: &mut toml::Value,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<(), VigilError> {
    for mapping in ENV_MAPPINGS {
        if let Some(raw) = lookup(mapping.env_var) {
            validate_env_value(mapping.env_var, &raw)?;
            let value = match mapping.kind {
                ValueKind::String => toml::Value::String(raw),
                ValueKind::Integer => {
                    let n: i64 = raw.trim().parse().map_err(|_| {
                        VigilError::ConfigError(format!(
                            "environment variable {} must be an integer, got {raw:?}",
                            mapping.env_var
                        ))
                    })?;
                    toml::Value::Integer(n)
                }
            };
            set_nested_value(tree, mapping.toml_path, value);
        }
    }
    Ok(())
}

/// Reject null bytes and control characters (except whitespace).
fn validate_env_value(var_name: &str, value: &str) -> Result<(), VigilError> {
    for ch in value.chars() {
        if ch == '\0' || (ch.is_control() && ch != '\t' && ch != '\n' && ch != '\r') {
            return Err(VigilError::ConfigError(format!(
                "environment variable {var_name} contains control character U+{:04X}",
                ch as u32
            )));
        }
    }
    Ok(())
}

fn set_nested_value(root: &mut toml::Value, path: &[&str], value: toml::Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let table = match current {
            toml::Value::Table(table) => table,
            other => {
                *other = toml::Value::Table(toml::map::Map::new());
                match other {
                    toml::Value::Table(table) => table,
                    _ => return,
                }
            }
        };
        current = table
            .entry(segment.to_string())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    if let toml::Value::Table(table) = current {
        table.insert(last.to_string(), value);
    }
}

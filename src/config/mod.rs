use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::Value;

use crate::wire::codec::{DELIMITER, MAX_ALIAS_BYTES};

pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../turnstile.toml");
pub const CONFIG_FILE_NAME: &str = "turnstile.toml";
const DEFAULTS_ORIGIN: &str = "<built-in defaults>";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub classifier: ClassifierConfig,
    pub storage: StorageConfig,
    pub client: ClientConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            human_friendly: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ephemeral_port_span: u16,
    pub accept_poll_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 49_200,
            ephemeral_port_span: 1_000,
            accept_poll_ms: 50,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub endpoints: Vec<String>,
    pub quantum_ms: u64,
    pub watchdog_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            endpoints: ["s01", "s02", "s03", "s04"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            quantum_ms: 15_000,
            watchdog_interval_ms: 1_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub accept_timeout_ms: u64,
    pub peek_timeout_ms: u64,
    pub settle_ms: u64,
    pub max_message_bytes: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            accept_timeout_ms: 30_000,
            peek_timeout_ms: 10_000,
            settle_ms: 250,
            max_message_bytes: 2_048,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub engine: String,
    pub base_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: "fs".to_owned(),
            base_dir: "~".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub log_path: String,
    pub response_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 49_200,
            log_path: "clientLog.txt".to_owned(),
            response_timeout_ms: 120_000,
        }
    }
}

/// Command line split into the explicit config path, positional words and
/// `--section.key value` overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub positional: Vec<String>,
    pub overrides: Vec<(String, String)>,
}

impl AppConfig {
    pub fn load_with_discovery(cli: &CliArgs) -> Result<Self, ConfigError> {
        match discover_config_path(cli.config_path.as_deref())? {
            Some(path) => Self::load_from_toml_with_args(path, cli.overrides.clone()),
            None => Self::load_from_toml_str_with_args(
                DEFAULT_CONFIG_TOML,
                DEFAULTS_ORIGIN,
                cli.overrides.clone(),
            ),
        }
    }

    pub fn load_from_toml_with_args(
        path: impl AsRef<Path>,
        overrides: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let origin = path.as_ref().to_string_lossy().to_string();
        let toml_content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: origin.clone(),
            source,
        })?;

        Self::load_from_toml_str_with_args(&toml_content, &origin, overrides)
    }

    // User content is layered over the built-in defaults before overrides apply,
    // so a partial file only needs the keys it changes.
    pub fn load_from_toml_str_with_args(
        toml_content: &str,
        origin: &str,
        overrides: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let mut root_value: Value =
            DEFAULT_CONFIG_TOML
                .parse()
                .map_err(|source| ConfigError::TomlParse {
                    path: DEFAULTS_ORIGIN.to_owned(),
                    source,
                })?;

        let user_value: Value = toml_content
            .parse()
            .map_err(|source| ConfigError::TomlParse {
                path: origin.to_owned(),
                source,
            })?;
        merge_values(&mut root_value, user_value);

        for (key_path, raw_value) in overrides {
            apply_override(&mut root_value, &key_path, &raw_value)?;
        }

        let config: Self = root_value.try_into().map_err(ConfigError::Deserialize)?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces the round-robin cycle with aliases given on the command line,
    /// keeping the configured list when none were given.
    pub fn with_endpoints(mut self, aliases: Vec<String>) -> Result<Self, ConfigError> {
        if !aliases.is_empty() {
            self.scheduler.endpoints = aliases;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }

        let mut seen = HashSet::new();
        for alias in &self.scheduler.endpoints {
            validate_alias(alias)?;
            if !seen.insert(alias.as_str()) {
                return Err(ConfigError::DuplicateEndpoint {
                    alias: alias.clone(),
                });
            }
        }

        if self.scheduler.quantum_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.quantum_ms",
                reason: "quantum must be greater than zero".to_owned(),
            });
        }
        if self.classifier.max_message_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "classifier.max_message_bytes",
                reason: "message buffer must hold at least one byte".to_owned(),
            });
        }

        let last_port = u32::from(self.server.port) + u32::from(self.server.ephemeral_port_span);
        if self.server.ephemeral_port_span > 0
            && (self.server.port == 0 || last_port > u32::from(u16::MAX))
        {
            return Err(ConfigError::InvalidValue {
                key: "server.ephemeral_port_span",
                reason: format!(
                    "ports {}..={} do not fit a fixed base port; use a non-zero base port and keep the range within 65535, or set the span to 0",
                    u32::from(self.server.port) + 1,
                    last_port
                ),
            });
        }

        Ok(())
    }
}

fn validate_alias(alias: &str) -> Result<(), ConfigError> {
    let reason = if alias.is_empty() {
        Some("alias must not be empty")
    } else if alias.len() > MAX_ALIAS_BYTES {
        Some("alias is longer than 31 bytes")
    } else if alias.as_bytes().contains(&DELIMITER) {
        Some("alias must not contain the '|' delimiter")
    } else if alias == "." || alias == ".." || alias.chars().any(is_path_hostile) {
        Some("alias must be usable as a directory name")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidEndpointAlias {
            alias: alias.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

fn is_path_hostile(c: char) -> bool {
    c.is_whitespace() || c == '/' || c == '\\' || c == '\0'
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    TomlParse {
        path: String,
        source: toml::de::Error,
    },
    Deserialize(toml::de::Error),
    MissingValueForArg {
        key: String,
    },
    InvalidArgFormat {
        arg: String,
    },
    InvalidPath {
        key: String,
    },
    UnknownPath {
        key: String,
    },
    UnsupportedOverrideType {
        key: String,
    },
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
    NoEndpoints,
    DuplicateEndpoint {
        alias: String,
    },
    InvalidEndpointAlias {
        alias: String,
        reason: &'static str,
    },
    InvalidValue {
        key: &'static str,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file '{path}': {source}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse TOML config '{path}': {source}")
            }
            Self::Deserialize(source) => write!(f, "failed to deserialize config: {source}"),
            Self::MissingValueForArg { key } => {
                write!(f, "missing value for CLI override '--{key}'")
            }
            Self::InvalidArgFormat { arg } => write!(
                f,
                "invalid CLI argument format '{arg}', expected '--section.key value'"
            ),
            Self::InvalidPath { key } => write!(f, "invalid override key path '{key}'"),
            Self::UnknownPath { key } => write!(f, "unknown override key path '{key}'"),
            Self::UnsupportedOverrideType { key } => {
                write!(f, "override not supported for complex TOML type at '{key}'")
            }
            Self::InvalidValueForType {
                key,
                expected,
                value,
            } => write!(
                f,
                "invalid value '{value}' for '{key}', expected type {expected}"
            ),
            Self::NoEndpoints => write!(f, "at least one endpoint alias is required"),
            Self::DuplicateEndpoint { alias } => {
                write!(f, "endpoint alias '{alias}' is listed more than once")
            }
            Self::InvalidEndpointAlias { alias, reason } => {
                write!(f, "invalid endpoint alias '{alias}': {reason}")
            }
            Self::InvalidValue { key, reason } => write!(f, "invalid value for '{key}': {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn parse_cli_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, ConfigError> {
    let mut parsed = CliArgs::default();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            parsed.positional.push(arg);
            continue;
        };

        if stripped.is_empty() {
            return Err(ConfigError::InvalidArgFormat { arg });
        }

        let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
            key: stripped.to_owned(),
        })?;

        if stripped == "config" {
            parsed.config_path = Some(PathBuf::from(value));
        } else {
            parsed.overrides.push((stripped.to_owned(), value));
        }
    }

    Ok(parsed)
}

fn discover_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::Io {
                path: path.to_string_lossy().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
            });
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(Some(local));
    }

    if let Ok(home) = std::env::var("HOME") {
        let in_home = Path::new(&home).join(".turnstile").join(CONFIG_FILE_NAME);
        if in_home.is_file() {
            return Ok(Some(in_home));
        }
    }

    Ok(None)
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if parts.is_empty() || parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }

    let mut current = root;
    for section in &parts[..parts.len() - 1] {
        let table = current
            .as_table_mut()
            .ok_or_else(|| ConfigError::UnknownPath {
                key: key_path.to_owned(),
            })?;
        current = table.get_mut(*section).ok_or_else(|| ConfigError::UnknownPath {
            key: key_path.to_owned(),
        })?;
    }

    let final_key = parts[parts.len() - 1];
    let table = current
        .as_table_mut()
        .ok_or_else(|| ConfigError::UnknownPath {
            key: key_path.to_owned(),
        })?;
    let current_value = table
        .get_mut(final_key)
        .ok_or_else(|| ConfigError::UnknownPath {
            key: key_path.to_owned(),
        })?;

    let parsed_value = parse_value_using_current_type(key_path, raw_value, current_value)?;
    *current_value = parsed_value;

    Ok(())
}

fn parse_value_using_current_type(
    key_path: &str,
    raw_value: &str,
    current_value: &Value,
) -> Result<Value, ConfigError> {
    let invalid = |expected: &'static str| ConfigError::InvalidValueForType {
        key: key_path.to_owned(),
        expected,
        value: raw_value.to_owned(),
    };

    match current_value {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => raw_value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Value::Float(_) => raw_value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("float")),
        Value::Boolean(_) => raw_value
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| invalid("boolean")),
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => {
            Err(ConfigError::UnsupportedOverrideType {
                key: key_path.to_owned(),
            })
        }
    }
}

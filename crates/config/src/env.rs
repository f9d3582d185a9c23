//! Environment variable parsing and env-to-config merging.
//!
//! This module keeps env parsing:
//! - strict (invalid values fail fast)
//! - explicit (lookups go through an [`EnvSource`] instead of a global map)
//! - safe (secret values are redacted in error metadata)

use crate::schema::{HandlerConfig, ValidatedHandlerConfig};
use batch_shim_shared::{ErrorCode, ErrorEnvelope, redact_if_secret};
use std::collections::BTreeMap;
use std::fmt;

/// Env var: headroom subtracted from the invocation deadline (ms).
pub const ENV_BATCH_SAFETY_MARGIN_MS: &str = "BATCH_SAFETY_MARGIN_MS";
/// Env var: suppress the combined per-item records.
pub const ENV_BATCH_SUPPRESS_ITEM_LOGS: &str = "BATCH_SUPPRESS_ITEM_LOGS";
/// Env var: add the raw input payload to each item's combined record.
pub const ENV_LOG_INPUT_EVENT: &str = "LOG_INPUT_EVENT";
/// Env var: telemetry flush interval (ms).
pub const ENV_TELEMETRY_FLUSH_INTERVAL_MS: &str = "TELEMETRY_FLUSH_INTERVAL_MS";
/// Env var: telemetry inbound channel capacity.
pub const ENV_TELEMETRY_CHANNEL_CAPACITY: &str = "TELEMETRY_CHANNEL_CAPACITY";
/// Env var: namespace for metrics recorded through the execution context.
pub const ENV_METRIC_NAMESPACE: &str = "METRIC_NAMESPACE";
/// Env var: minimum log level.
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
/// Env var: tracing header injected by the platform.
pub const ENV_TRACE_HEADER: &str = "_X_AMZN_TRACE_ID";

const HANDLER_ENV_VARS: [&str; 7] = [
    ENV_BATCH_SAFETY_MARGIN_MS,
    ENV_BATCH_SUPPRESS_ITEM_LOGS,
    ENV_LOG_INPUT_EVENT,
    ENV_TELEMETRY_FLUSH_INTERVAL_MS,
    ENV_TELEMETRY_CHANNEL_CAPACITY,
    ENV_METRIC_NAMESPACE,
    ENV_LOG_LEVEL,
];

/// Env lookups with an explicit override map.
///
/// Precedence: override map, then the process environment (when enabled).
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    overrides: BTreeMap<String, String>,
    read_process_env: bool,
}

impl EnvSource {
    /// Read from the process environment only.
    #[must_use]
    pub const fn process() -> Self {
        Self {
            overrides: BTreeMap::new(),
            read_process_env: true,
        }
    }

    /// Read only from the provided map (useful for tests and fixtures).
    #[must_use]
    pub const fn from_map(map: BTreeMap<String, String>) -> Self {
        Self {
            overrides: map,
            read_process_env: false,
        }
    }

    /// Layer an override map on top of this source.
    #[must_use]
    pub fn with_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Set a single override.
    #[must_use]
    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    /// Look up a variable. Returns `None` when it is not set anywhere.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(value) = self.overrides.get(name) {
            return Some(value.clone());
        }
        if self.read_process_env {
            return std::env::var(name).ok();
        }
        None
    }

    /// Look up a variable that must be set and non-empty.
    pub fn require(&self, var: &'static str) -> Result<String, EnvParseError> {
        let raw = self.get(var).ok_or(EnvParseError::Missing { var })?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EnvParseError::EmptyValue { var });
        }
        Ok(trimmed.to_owned())
    }

    /// Look up a required unsigned integer.
    pub fn require_u64(&self, var: &'static str) -> Result<u64, EnvParseError> {
        let value = self.require(var)?;
        parse_u64(var, &value)
    }

    /// Look up a required boolean.
    pub fn require_bool(&self, var: &'static str) -> Result<bool, EnvParseError> {
        let value = self.require(var)?;
        parse_bool(var, &value)
    }

    /// Look up a required floating-point number.
    pub fn require_f64(&self, var: &'static str) -> Result<f64, EnvParseError> {
        let value = self.require(var)?;
        value
            .parse::<f64>()
            .ok()
            .filter(|parsed| parsed.is_finite())
            .ok_or(EnvParseError::InvalidFloat { var, value })
    }

    /// Look up a required JSON object of string values.
    pub fn require_map(&self, var: &'static str) -> Result<BTreeMap<String, String>, EnvParseError> {
        let value = self.require(var)?;
        serde_json::from_str(&value).map_err(|_| EnvParseError::InvalidMap { var, value })
    }

    fn snapshot(&self, vars: &[&'static str]) -> BTreeMap<String, String> {
        vars.iter()
            .filter_map(|var| self.get(var).map(|value| ((*var).to_owned(), value)))
            .collect()
    }
}

/// Parsed env overrides for [`HandlerConfig`]. `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerEnv {
    /// `BATCH_SAFETY_MARGIN_MS`.
    pub safety_margin_ms: Option<u64>,
    /// `BATCH_SUPPRESS_ITEM_LOGS`.
    pub suppress_item_logs: Option<bool>,
    /// `LOG_INPUT_EVENT`.
    pub log_input_event: Option<bool>,
    /// `TELEMETRY_FLUSH_INTERVAL_MS`.
    pub flush_interval_ms: Option<u64>,
    /// `TELEMETRY_CHANNEL_CAPACITY`.
    pub channel_capacity: Option<u32>,
    /// `METRIC_NAMESPACE`.
    pub metric_namespace: Option<Box<str>>,
    /// `LOG_LEVEL`.
    pub log_level: Option<Box<str>>,
}

impl HandlerEnv {
    /// Parse env overrides from a key/value map.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, EnvParseError> {
        Ok(Self {
            safety_margin_ms: parse_optional_u64(map, ENV_BATCH_SAFETY_MARGIN_MS)?,
            suppress_item_logs: parse_optional_bool(map, ENV_BATCH_SUPPRESS_ITEM_LOGS)?,
            log_input_event: parse_optional_bool(map, ENV_LOG_INPUT_EVENT)?,
            flush_interval_ms: parse_optional_u64(map, ENV_TELEMETRY_FLUSH_INTERVAL_MS)?,
            channel_capacity: parse_optional_u32(map, ENV_TELEMETRY_CHANNEL_CAPACITY)?,
            metric_namespace: parse_optional_trimmed_string(map, ENV_METRIC_NAMESPACE)?,
            log_level: parse_optional_trimmed_string(map, ENV_LOG_LEVEL)?,
        })
    }

    /// Parse env overrides from an [`EnvSource`].
    pub fn from_source(source: &EnvSource) -> Result<Self, EnvParseError> {
        Self::from_map(&source.snapshot(&HANDLER_ENV_VARS))
    }

    /// Parse env overrides from the current process environment.
    pub fn from_std_env() -> Result<Self, EnvParseError> {
        Self::from_source(&EnvSource::process())
    }
}

/// Apply env overrides to a base config (env wins over file/default values).
pub fn apply_env_overrides(
    base: HandlerConfig,
    env: &HandlerEnv,
) -> Result<ValidatedHandlerConfig, ErrorEnvelope> {
    let mut config = base;

    if let Some(value) = env.safety_margin_ms {
        config.dispatch.safety_margin_ms = value;
    }
    if let Some(value) = env.suppress_item_logs {
        config.dispatch.suppress_item_logs = value;
    }
    if let Some(value) = env.log_input_event {
        config.dispatch.log_input_event = value;
    }
    if let Some(value) = env.flush_interval_ms {
        config.telemetry.flush_interval_ms = value;
    }
    if let Some(value) = env.channel_capacity {
        config.telemetry.channel_capacity = value;
    }
    if let Some(value) = env.metric_namespace.as_ref() {
        config.telemetry.namespace = Some(value.clone());
    }
    if let Some(value) = env.log_level.as_ref() {
        config.logging.level = value.clone();
    }

    config.validate_and_normalize().map_err(Into::into)
}

/// Validation failures when parsing env variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvParseError {
    /// A required env var was not set.
    Missing {
        /// Env var name.
        var: &'static str,
    },
    /// An env var was present but empty after trimming.
    EmptyValue {
        /// Env var name.
        var: &'static str,
    },
    /// Boolean env var had an invalid value.
    InvalidBool {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Integer env var had an invalid value.
    InvalidInt {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Float env var had an invalid value.
    InvalidFloat {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Map env var was not a JSON object of strings.
    InvalidMap {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
}

impl EnvParseError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::Missing { .. } => ErrorCode::new("config", "missing_env_var"),
            Self::EmptyValue { .. } => ErrorCode::new("config", "empty_env_var"),
            Self::InvalidBool { .. } => ErrorCode::new("config", "invalid_env_bool"),
            Self::InvalidInt { .. } => ErrorCode::new("config", "invalid_env_int"),
            Self::InvalidFloat { .. } => ErrorCode::new("config", "invalid_env_float"),
            Self::InvalidMap { .. } => ErrorCode::new("config", "invalid_env_map"),
        }
    }
}

impl fmt::Display for EnvParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { var } => write!(formatter, "{var} must be set"),
            Self::EmptyValue { var } => write!(formatter, "{var} must be non-empty"),
            Self::InvalidBool { var, .. } => write!(formatter, "{var} must be a boolean"),
            Self::InvalidInt { var, .. } => write!(formatter, "{var} must be an integer"),
            Self::InvalidFloat { var, .. } => write!(formatter, "{var} must be a finite number"),
            Self::InvalidMap { var, .. } => {
                write!(formatter, "{var} must be a JSON object of strings")
            },
        }
    }
}

impl std::error::Error for EnvParseError {}

impl From<EnvParseError> for ErrorEnvelope {
    fn from(error: EnvParseError) -> Self {
        let code = error.error_code();
        let message = error.to_string();
        let envelope = Self::expected(code, message);

        match error {
            EnvParseError::Missing { var } | EnvParseError::EmptyValue { var } => {
                envelope.with_metadata("env_var", var)
            },
            EnvParseError::InvalidBool { var, value }
            | EnvParseError::InvalidInt { var, value }
            | EnvParseError::InvalidFloat { var, value }
            | EnvParseError::InvalidMap { var, value } => envelope
                .with_metadata("env_var", var)
                .with_metadata("value", redact_if_secret(var, &value)),
        }
    }
}

fn parse_optional_trimmed_string(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Box<str>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    Ok(Some(trimmed.to_owned().into_boxed_str()))
}

fn parse_optional_u64(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u64>, EnvParseError> {
    parse_optional_trimmed_string(map, var)?
        .map(|value| parse_u64(var, &value))
        .transpose()
}

fn parse_optional_u32(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u32>, EnvParseError> {
    let Some(value) = parse_optional_trimmed_string(map, var)? else {
        return Ok(None);
    };
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: value.into_string(),
        })
}

fn parse_optional_bool(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<bool>, EnvParseError> {
    parse_optional_trimmed_string(map, var)?
        .map(|value| parse_bool(var, &value))
        .transpose()
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64, EnvParseError> {
    value.parse::<u64>().map_err(|_| EnvParseError::InvalidInt {
        var,
        value: value.to_owned(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, EnvParseError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(EnvParseError::InvalidBool {
            var,
            value: value.to_owned(),
        }),
    }
}

//! Handler configuration schema, defaults, and validation.
//!
//! - Deserialization uses `serde` (JSON).
//! - Validation is manual and returns typed errors mapped to `ErrorEnvelope`.
//! - Normalization lowercases the log level and trims the metric namespace.

use batch_shim_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Current supported configuration schema version.
pub const CURRENT_CONFIG_VERSION: u32 = 1;

const SAFETY_MARGIN_DEFAULT_MS: u64 = 500;
const SAFETY_MARGIN_MAX_MS: u64 = 60_000;

const FLUSH_INTERVAL_DEFAULT_MS: u64 = 10_000;
const FLUSH_INTERVAL_MIN_MS: u64 = 10;
const FLUSH_INTERVAL_MAX_MS: u64 = 3_600_000;

const CHANNEL_CAPACITY_DEFAULT: u32 = 100;
const CHANNEL_CAPACITY_MIN: u32 = 1;
const CHANNEL_CAPACITY_MAX: u32 = 1_000_000;

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Top-level handler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct HandlerConfig {
    /// Schema version for forward-compatible migrations.
    pub version: u32,
    /// Batch dispatch settings.
    pub dispatch: DispatchConfig,
    /// Telemetry pipeline settings.
    pub telemetry: TelemetryConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            dispatch: DispatchConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HandlerConfig {
    /// Validate and normalize the config.
    pub fn validate_and_normalize(mut self) -> Result<ValidatedHandlerConfig, ConfigSchemaError> {
        if self.version != CURRENT_CONFIG_VERSION {
            return Err(ConfigSchemaError::UnsupportedVersion {
                found: self.version,
                supported: CURRENT_CONFIG_VERSION,
            });
        }

        self.dispatch.validate()?;
        self.telemetry.normalize();
        self.telemetry.validate()?;
        self.logging.normalize();
        self.logging.validate()?;

        Ok(ValidatedHandlerConfig { raw: self })
    }
}

/// Validated config wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedHandlerConfig {
    raw: HandlerConfig,
}

impl ValidatedHandlerConfig {
    /// Borrow the raw config.
    #[must_use]
    pub const fn as_ref(&self) -> &HandlerConfig {
        &self.raw
    }

    /// Consume the wrapper and return the raw config.
    #[must_use]
    pub fn into_inner(self) -> HandlerConfig {
        self.raw
    }
}

impl AsRef<HandlerConfig> for ValidatedHandlerConfig {
    fn as_ref(&self) -> &HandlerConfig {
        &self.raw
    }
}

impl std::ops::Deref for ValidatedHandlerConfig {
    type Target = HandlerConfig;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

/// Batch dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DispatchConfig {
    /// Headroom subtracted from the invocation deadline before items time out.
    pub safety_margin_ms: u64,
    /// Drop the combined per-item records.
    pub suppress_item_logs: bool,
    /// Add the raw input payload to each item's combined record.
    pub log_input_event: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            safety_margin_ms: SAFETY_MARGIN_DEFAULT_MS,
            suppress_item_logs: false,
            log_input_event: false,
        }
    }
}

impl DispatchConfig {
    /// Safety margin as a duration.
    #[must_use]
    pub const fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }

    const fn validate(&self) -> Result<(), ConfigSchemaError> {
        if self.safety_margin_ms > SAFETY_MARGIN_MAX_MS {
            return Err(ConfigSchemaError::LimitOutOfRange {
                section: "dispatch",
                field: "safetyMarginMs",
                value: self.safety_margin_ms,
                min: 0,
                max: SAFETY_MARGIN_MAX_MS,
            });
        }
        Ok(())
    }
}

/// Telemetry pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct TelemetryConfig {
    /// Interval between periodic flushes.
    pub flush_interval_ms: u64,
    /// Capacity of the inbound measurement channel.
    pub channel_capacity: u32,
    /// Namespace used by the context metric builder. Metrics are disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Box<str>>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: FLUSH_INTERVAL_DEFAULT_MS,
            channel_capacity: CHANNEL_CAPACITY_DEFAULT,
            namespace: None,
        }
    }
}

impl TelemetryConfig {
    /// Flush interval as a duration.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Channel capacity as `usize`.
    #[must_use]
    pub const fn channel_capacity(&self) -> usize {
        self.channel_capacity as usize
    }

    fn normalize(&mut self) {
        self.namespace = self
            .namespace
            .take()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(String::into_boxed_str);
    }

    fn validate(&self) -> Result<(), ConfigSchemaError> {
        if self.flush_interval_ms < FLUSH_INTERVAL_MIN_MS
            || self.flush_interval_ms > FLUSH_INTERVAL_MAX_MS
        {
            return Err(ConfigSchemaError::LimitOutOfRange {
                section: "telemetry",
                field: "flushIntervalMs",
                value: self.flush_interval_ms,
                min: FLUSH_INTERVAL_MIN_MS,
                max: FLUSH_INTERVAL_MAX_MS,
            });
        }
        if self.channel_capacity < CHANNEL_CAPACITY_MIN
            || self.channel_capacity > CHANNEL_CAPACITY_MAX
        {
            return Err(ConfigSchemaError::LimitOutOfRange {
                section: "telemetry",
                field: "channelCapacity",
                value: u64::from(self.channel_capacity),
                min: u64::from(CHANNEL_CAPACITY_MIN),
                max: u64::from(CHANNEL_CAPACITY_MAX),
            });
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Minimum level (`debug`, `info`, `warn`, `error`).
    pub level: Box<str>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl LoggingConfig {
    fn normalize(&mut self) {
        let lowered = self.level.trim().to_ascii_lowercase();
        let normalized = if lowered == "warning" {
            "warn".to_owned()
        } else {
            lowered
        };
        self.level = normalized.into_boxed_str();
    }

    fn validate(&self) -> Result<(), ConfigSchemaError> {
        if LOG_LEVELS.contains(&self.level.as_ref()) {
            return Ok(());
        }
        Err(ConfigSchemaError::InvalidLogLevel {
            value: self.level.to_string(),
        })
    }
}

/// Typed validation errors for the configuration schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSchemaError {
    /// The config version is not supported by this binary.
    UnsupportedVersion {
        /// Version found in the config.
        found: u32,
        /// Version supported by this crate.
        supported: u32,
    },
    /// A numeric limit is out of bounds.
    LimitOutOfRange {
        /// Schema section (e.g. `telemetry`).
        section: &'static str,
        /// Field name in the config file (e.g. `flushIntervalMs`).
        field: &'static str,
        /// Value provided.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },
    /// Unknown log level name.
    InvalidLogLevel {
        /// Normalized value.
        value: String,
    },
}

impl ConfigSchemaError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedVersion { .. } => ErrorCode::new("config", "unsupported_version"),
            Self::LimitOutOfRange { .. } => ErrorCode::new("config", "invalid_limit"),
            Self::InvalidLogLevel { .. } => ErrorCode::new("config", "invalid_log_level"),
        }
    }
}

impl fmt::Display for ConfigSchemaError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { found, supported } => {
                write!(
                    formatter,
                    "unsupported config version: {found} (supported: {supported})"
                )
            },
            Self::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min}, {max}] (got {value})"
            ),
            Self::InvalidLogLevel { value } => {
                write!(formatter, "logging.level has an unsupported value: {value}")
            },
        }
    }
}

impl std::error::Error for ConfigSchemaError {}

impl From<ConfigSchemaError> for ErrorEnvelope {
    fn from(error: ConfigSchemaError) -> Self {
        let code = error.error_code();
        let message = error.to_string();
        let envelope = Self::expected(code, message);

        match error {
            ConfigSchemaError::UnsupportedVersion { found, supported } => envelope
                .with_metadata("found", found.to_string())
                .with_metadata("supported", supported.to_string()),
            ConfigSchemaError::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value", value.to_string())
                .with_metadata("min", min.to_string())
                .with_metadata("max", max.to_string()),
            ConfigSchemaError::InvalidLogLevel { value } => envelope
                .with_metadata("section", "logging")
                .with_metadata("field", "level")
                .with_metadata("value", value),
        }
    }
}

/// Parse a handler config from JSON and validate it.
pub fn parse_handler_config_json(input: &str) -> Result<ValidatedHandlerConfig, ErrorEnvelope> {
    let config: HandlerConfig = serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid config JSON: {error}"),
        )
    })?;
    config.validate_and_normalize().map_err(Into::into)
}

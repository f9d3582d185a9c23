//! # batch-shim-config
//!
//! Configuration schema, env parsing, and loading for the batch handler.
//! This crate depends on `shared` only.

/// Environment variable parsing and merging.
pub mod env;
/// Config loading helpers (env + file).
pub mod load;
/// Configuration schema types and helpers.
pub mod schema;

pub use env::{
    ENV_BATCH_SAFETY_MARGIN_MS, ENV_BATCH_SUPPRESS_ITEM_LOGS, ENV_LOG_INPUT_EVENT, ENV_LOG_LEVEL,
    ENV_METRIC_NAMESPACE, ENV_TELEMETRY_CHANNEL_CAPACITY, ENV_TELEMETRY_FLUSH_INTERVAL_MS,
    ENV_TRACE_HEADER, EnvParseError, EnvSource, HandlerEnv, apply_env_overrides,
};
pub use load::{
    load_handler_config, load_handler_config_from_path, load_handler_config_from_sources,
    load_handler_config_std_env, to_pretty_json,
};
pub use schema::{
    CURRENT_CONFIG_VERSION, ConfigSchemaError, DispatchConfig, HandlerConfig, LoggingConfig,
    TelemetryConfig, ValidatedHandlerConfig, parse_handler_config_json,
};

/// Returns the config crate version.
#[must_use]
pub const fn config_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

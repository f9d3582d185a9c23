//! Config loading helpers (env + file).
//!
//! The loader is responsible for deterministic merge order and surfacing
//! user-facing errors as typed `ErrorEnvelope`s.

use crate::{EnvSource, HandlerConfig, HandlerEnv, ValidatedHandlerConfig, apply_env_overrides};
use batch_shim_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use std::path::Path;

/// Load the handler config using a deterministic precedence order.
///
/// Precedence (highest wins):
/// - env overrides (`HandlerEnv`)
/// - config JSON
/// - defaults (`HandlerConfig::default()`)
pub fn load_handler_config_from_sources(
    config_json: Option<&str>,
    env: &HandlerEnv,
) -> Result<ValidatedHandlerConfig, ErrorEnvelope> {
    let config = match config_json {
        None => HandlerConfig::default(),
        Some(input) => parse_config_unvalidated(input)?,
    };

    // env is applied last and also validates/normalizes the resulting config.
    apply_env_overrides(config, env)
}

/// Load the handler config from an optional JSON file path.
pub fn load_handler_config_from_path(
    config_path: Option<&Path>,
    env: &HandlerEnv,
) -> Result<ValidatedHandlerConfig, ErrorEnvelope> {
    let config_text = config_path.map(read_config_file).transpose()?;
    load_handler_config_from_sources(config_text.as_deref(), env)
}

/// Load the handler config from an [`EnvSource`] and an optional file path.
pub fn load_handler_config(
    config_path: Option<&Path>,
    source: &EnvSource,
) -> Result<ValidatedHandlerConfig, ErrorEnvelope> {
    let env = HandlerEnv::from_source(source).map_err(ErrorEnvelope::from)?;
    load_handler_config_from_path(config_path, &env)
}

/// Load the handler config from the process environment and an optional file path.
pub fn load_handler_config_std_env(
    config_path: Option<&Path>,
) -> Result<ValidatedHandlerConfig, ErrorEnvelope> {
    load_handler_config(config_path, &EnvSource::process())
}

/// Serialize the config as deterministic pretty JSON (with trailing newline).
pub fn to_pretty_json(config: &HandlerConfig) -> Result<String, ErrorEnvelope> {
    let mut output = serde_json::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!("failed to serialize config: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

fn parse_config_unvalidated(input: &str) -> Result<HandlerConfig, ErrorEnvelope> {
    serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid config JSON: {error}"),
        )
        .with_metadata("source", "config")
    })
}

fn read_config_file(path: &Path) -> Result<String, ErrorEnvelope> {
    std::fs::read_to_string(path).map_err(|error| {
        ErrorEnvelope::from(error).with_metadata("path", path.display().to_string())
    })
}

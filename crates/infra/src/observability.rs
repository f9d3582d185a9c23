use batch_shim_shared::{ErrorCode, ErrorEnvelope, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a JSON `tracing` subscriber on stderr filtered at `level`.
///
/// `level` accepts any `EnvFilter` directive (`info`, `batch_shim_app=debug`).
/// Fails if the directive is invalid or a global subscriber is already set.
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_log_level"),
            format!("invalid tracing filter: {error}"),
        )
        .with_metadata("level", level)
    })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .try_init()
        .map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("observability", "already_initialized"),
                error.to_string(),
            )
        })
}

/// Extract the trace id from an X-Ray trace header.
///
/// Takes the segment before the first `;` and strips its `Root=` prefix.
/// Returns `None` for a blank header.
#[must_use]
pub fn trace_id_from_header(header: &str) -> Option<String> {
    let root = header.split(';').next().unwrap_or_default().trim();
    if root.is_empty() {
        return None;
    }
    let trace_id = root.replacen("Root=", "", 1);
    (!trace_id.is_empty()).then_some(trace_id)
}

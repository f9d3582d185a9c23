//! # batch-shim-infra
//!
//! Runtime composition: wires config, adapters, and the dispatch core into a
//! per-invocation handler.
//! This crate depends on `app`, `adapters`, `config`, and `shared`.

/// Tracing subscriber setup and trace header parsing.
pub mod observability;
/// Invocation wrapper around the batch dispatcher.
pub mod runtime;

pub use observability::{init_tracing, trace_id_from_header};
pub use runtime::{HandlerRuntime, Invocation, json_processor};

/// Returns the infra crate version.
#[must_use]
pub const fn infra_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_shim_adapters::adapters_crate_version;
    use batch_shim_app::app_crate_version;
    use batch_shim_config::config_crate_version;
    use batch_shim_shared::shared_crate_version;

    fn workspace_deps() -> Vec<String> {
        let cargo_toml = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        let mut deps = Vec::new();
        let mut in_deps = false;

        for raw_line in cargo_toml.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                in_deps = line == "[dependencies]";
                continue;
            }
            if in_deps && line.starts_with("batch-shim-") {
                let key = line.split('=').next().unwrap_or("").trim();
                let name = key.split('.').next().unwrap_or("").trim();
                deps.push(name.to_string());
            }
        }

        deps
    }

    #[test]
    fn infra_depends_on_app_adapters_config() {
        let deps = workspace_deps();
        for expected in ["batch-shim-app", "batch-shim-adapters", "batch-shim-config"] {
            assert!(
                deps.iter().any(|dep| dep == expected),
                "missing dependency: {expected}"
            );
        }
        assert!(!deps.iter().any(|dep| dep == "batch-shim-testkit"));
    }

    #[test]
    fn infra_can_use_app_adapters_config_shared() {
        assert!(!infra_crate_version().is_empty());
        assert!(!app_crate_version().is_empty());
        assert!(!adapters_crate_version().is_empty());
        assert!(!config_crate_version().is_empty());
        assert!(!shared_crate_version().is_empty());
    }
}

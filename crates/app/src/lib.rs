//! # batch-shim-app
//!
//! The dispatch core: execution contexts with story logging, the per-item
//! runner, the concurrent batch dispatcher, and the background telemetry
//! aggregator. This crate depends on `ports`, `domain`, and `shared`.

pub mod context;
pub mod dispatcher;
pub mod processor;
pub mod runner;
pub mod story;
pub mod telemetry;

pub use context::{ExecutionContext, MetricBuilder, StoryFinalizer};
pub use dispatcher::{BatchDispatcher, DEFAULT_SAFETY_MARGIN, DispatchOptions};
pub use processor::{
    FnProcessor, ItemError, ItemProcessor, ItemResult, JsonItemProcessor, LoggerParams,
    TypedItemHandler, processor_fn,
};
pub use runner::{run_item, trace_lines};
pub use story::{SUMMARY_LIMIT, StoryLogger, StoryMode, summarize};
pub use telemetry::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_FLUSH_INTERVAL, TelemetryAggregator, TelemetryBuffer,
    TelemetryHandle, TelemetryOptions,
};

/// Returns the app crate version.
#[must_use]
pub const fn app_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_shim_domain::domain_crate_version;
    use batch_shim_ports::ports_crate_version;
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
    fn app_runtime_deps_stay_inside_the_core() {
        let allowed = ["batch-shim-ports", "batch-shim-domain", "batch-shim-shared"];
        for dep in workspace_deps() {
            assert!(allowed.contains(&dep.as_str()), "unexpected dependency: {dep}");
        }
    }

    #[test]
    fn app_can_use_ports_domain_shared() {
        assert!(!app_crate_version().is_empty());
        assert!(!ports_crate_version().is_empty());
        assert!(!domain_crate_version().is_empty());
        assert!(!shared_crate_version().is_empty());
    }
}

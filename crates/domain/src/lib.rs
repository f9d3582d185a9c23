//! # batch-shim-domain
//!
//! Domain model for one batch invocation.
//!
//! - **Batch** - `ItemId`, `BatchItem`, `ItemOutcome`, `BatchResult`
//! - **Measurement** - `Measurement`, the unit consumed by the telemetry pipeline
//!
//! ## Dependency Rules
//!
//! - Depends only on `shared` crate
//! - No infrastructure or adapter dependencies
//! - Pure domain logic with no I/O

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

// Re-export shared types for convenience
pub use batch_shim_shared::shared_crate_version;

// =============================================================================
// DOMAIN MODULES
// =============================================================================

pub mod batch;
pub mod measurement;

pub use batch::{BatchError, BatchItem, BatchResult, ItemAttributes, ItemId, ItemOutcome};
pub use measurement::{Dimensions, Measurement, MeasurementError};

/// Returns the domain crate version.
#[must_use]
pub const fn domain_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// =============================================================================
// TESTS
// =============================================================================

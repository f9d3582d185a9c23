//! # batch-shim-ports
//!
//! Port traits for the batch-shim hexagonal architecture.
//!
//! This crate defines the interfaces between the dispatch core and its
//! collaborators (log sink, metric sink). It depends only on `domain` and
//! `shared`.

use std::future::Future;
use std::pin::Pin;

/// Boxed future used by port traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Returns the ports crate version.
#[must_use]
pub const fn ports_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub mod logger;
pub mod telemetry;

pub use logger::*;
pub use telemetry::*;

// Re-export selected domain types used in port signatures, so adapter crates
// can implement ports without directly depending on `batch-shim-domain`.
pub use batch_shim_domain::Measurement;

//! Metric sink boundary contract.

use crate::BoxFuture;
use batch_shim_domain::Measurement;
use batch_shim_shared::Result;

/// Destination for flushed measurements.
///
/// Called once per namespace per flush. A failed call is not retried; the
/// caller logs it and drops that batch.
pub trait MetricSinkPort: Send + Sync {
    /// Publish every measurement accumulated for `namespace` since the last flush.
    fn put_measurements<'a>(
        &'a self,
        namespace: &'a str,
        measurements: Vec<Measurement>,
    ) -> BoxFuture<'a, Result<()>>;
}

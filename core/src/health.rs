//! Readiness probes for backing stores.

use crate::error::StoreError;
use crate::BoxFuture;

/// A dependency that can be pinged.
pub trait HealthProbe: Send + Sync {
    /// Short component name reported by `/ready`.
    fn component(&self) -> &'static str;

    /// Round-trip to the dependency.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the dependency does not answer.
    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>>;
}

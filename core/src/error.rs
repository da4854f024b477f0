//! Error taxonomy for the purchase pipeline.
//!
//! Business rejections (out of stock, duplicate, closed sale) are *not* errors;
//! they are values (see [`crate::AdmissionOutcome`]). Everything here is an
//! infrastructure or data fault.

use thiserror::Error;

use crate::lock::LockError;
use crate::queue::QueueError;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, SeckillError>;

/// Errors raised by a relational or key-value store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Could not reach the store.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// The store rejected or failed a command.
    #[error("Store command failed: {0}")]
    CommandFailed(String),

    /// The stored data could not be interpreted.
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

/// Top-level pipeline error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeckillError {
    /// The atomic admission primitive failed to execute.
    #[error("Admission script failed: {0}")]
    Admission(String),

    /// Order intake queue failure.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Lock service failure.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The per-user lease is held by someone else.
    #[error("Lock '{0}' is held by another worker")]
    LockBusy(String),

    /// Store failure (orders, sales, counters).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The id generator could not produce an id.
    #[error("Id generation failed: {0}")]
    IdGeneration(String),

    /// A sale definition failed validation.
    #[error("Invalid sale: {0}")]
    InvalidSale(String),

    /// A queue entry does not decode into an order intent.
    #[error("Malformed order intent: {0}")]
    MalformedIntent(String),
}

impl SeckillError {
    /// Whether the caller may retry the same request.
    ///
    /// Validation and decoding faults are permanent; everything that touches
    /// infrastructure is transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidSale(_) | Self::MalformedIntent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SeckillError::Admission("NOSCRIPT".into()).is_transient());
        assert!(SeckillError::Store(StoreError::ConnectionFailed("down".into())).is_transient());
        assert!(SeckillError::LockBusy("order:1".into()).is_transient());
        assert!(!SeckillError::InvalidSale("stock".into()).is_transient());
        assert!(!SeckillError::MalformedIntent("id".into()).is_transient());
    }

    #[test]
    fn test_wrapped_errors_display_transparently() {
        let err = SeckillError::from(QueueError::GroupMissing("g1".into()));
        assert_eq!(err.to_string(), QueueError::GroupMissing("g1".into()).to_string());
    }

    #[test]
    fn test_only_refused_appends_are_known_unstored() {
        let refused = QueueError::AppendRejected {
            stream: "stream.orders".into(),
            reason: "WRONGTYPE".into(),
        };
        let lost = QueueError::AppendFailed {
            stream: "stream.orders".into(),
            reason: "connection reset".into(),
        };

        assert!(refused.is_unstored());
        assert!(!lost.is_unstored());
        assert!(!QueueError::ConnectionFailed("timeout".into()).is_unstored());
    }
}

//! Order intake queue abstraction.
//!
//! A durable, ordered stream of [`OrderIntent`]s with consumer-group semantics:
//!
//! - entries are delivered to a group in append order
//! - a delivered entry sits in the group's **pending list** until acknowledged
//! - delivery is at-least-once; a consumer that crashes before acknowledging
//!   finds its entries again through [`OrderQueue::read_pending`]
//!
//! # Wire contract
//!
//! Entries are flat string maps using the field names in
//! [`crate::types::fields`]. The default stream is [`DEFAULT_STREAM`], the
//! default group [`DEFAULT_GROUP`].

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::SeckillError;
use crate::types::OrderIntent;
use crate::BoxFuture;

/// Default stream name.
pub const DEFAULT_STREAM: &str = "stream.orders";

/// Default consumer group.
pub const DEFAULT_GROUP: &str = "g1";

/// Errors that can occur during queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Failed to reach the queue.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Appending an entry failed and its outcome is unknown: the entry may
    /// have been stored before the reply was lost.
    #[error("Append to '{stream}' failed: {reason}")]
    AppendFailed {
        /// Stream name
        stream: String,
        /// The reason for failure
        reason: String,
    },

    /// The queue refused the append; nothing was stored.
    #[error("Append to '{stream}' refused: {reason}")]
    AppendRejected {
        /// Stream name
        stream: String,
        /// The reason for refusal
        reason: String,
    },

    /// Reading from the group failed.
    #[error("Read from group '{group}' failed: {reason}")]
    ReadFailed {
        /// Consumer group
        group: String,
        /// The reason for failure
        reason: String,
    },

    /// Acknowledging an entry failed.
    #[error("Acknowledge of {id} failed: {reason}")]
    AckFailed {
        /// Message id
        id: MessageId,
        /// The reason for failure
        reason: String,
    },

    /// The consumer group does not exist (stream deleted or never created).
    #[error("Consumer group '{0}' does not exist")]
    GroupMissing(String),

    /// Generic transport error.
    #[error("Queue transport error: {0}")]
    Transport(String),
}

impl QueueError {
    /// Whether the failed operation certainly left nothing in the queue.
    ///
    /// Only an explicit refusal counts. A dropped connection or a timeout
    /// may hide a write that landed.
    #[must_use]
    pub const fn is_unstored(&self) -> bool {
        matches!(self, Self::AppendRejected { .. })
    }
}

/// Identifier the queue assigned to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub String);

impl MessageId {
    /// Wrap a raw id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry handed to a consumer.
///
/// Fields are kept raw so that an undecodable entry still has an id the
/// consumer can acknowledge or dead-letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue-assigned id.
    pub id: MessageId,
    /// Raw entry fields.
    pub fields: HashMap<String, String>,
}

impl Delivery {
    /// Create a delivery.
    #[must_use]
    pub const fn new(id: MessageId, fields: HashMap<String, String>) -> Self {
        Self { id, fields }
    }

    /// Decode the entry into an intent.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::MalformedIntent`] if the fields do not decode.
    pub fn intent(&self) -> Result<OrderIntent, SeckillError> {
        OrderIntent::from_fields(&self.fields)
    }
}

/// Durable intake queue with consumer groups.
pub trait OrderQueue: Send + Sync {
    /// Create the stream and consumer group if they do not exist yet.
    ///
    /// An already existing group is success.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the queue is unreachable.
    fn ensure_group(&self, group: &str) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Append an intent and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AppendRejected`] if the queue refused the entry,
    /// or [`QueueError::AppendFailed`] if the outcome is unknown.
    fn append(&self, intent: &OrderIntent) -> BoxFuture<'_, Result<MessageId, QueueError>>;

    /// Read the next never-delivered entry for `group` as `consumer`.
    ///
    /// Waits up to `block` for an entry to arrive; `Duration::ZERO` does not
    /// wait. `Ok(None)` on timeout is the idle case, not a failure.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the read fails.
    fn read_next(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> BoxFuture<'_, Result<Option<Delivery>, QueueError>>;

    /// Acknowledge an entry, removing it from the group's pending list.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] if the acknowledgement was not stored.
    fn acknowledge(&self, group: &str, id: &MessageId) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Read up to `count` entries delivered to `consumer` but not yet
    /// acknowledged, oldest first. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the read fails.
    fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<Delivery>, QueueError>>;

    /// Park an undecodable entry on the dead-letter stream with `reason`.
    ///
    /// Does not acknowledge; the caller acknowledges afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AppendFailed`] if the dead-letter entry was not stored.
    fn dead_letter(&self, delivery: &Delivery, reason: &str)
    -> BoxFuture<'_, Result<(), QueueError>>;
}

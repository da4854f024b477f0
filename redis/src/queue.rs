//! Order queue on a `Redis` stream.
//!
//! | operation | command |
//! |---|---|
//! | `ensure_group` | `XGROUP CREATE {stream} {group} 0 MKSTREAM` |
//! | `append` | `XADD {stream} * id .. userId .. voucherId .. admittedAt ..` |
//! | `read_next` | `XREADGROUP GROUP {group} {consumer} COUNT 1 BLOCK {ms} STREAMS {stream} >` |
//! | `read_pending` | `XREADGROUP GROUP {group} {consumer} COUNT {n} STREAMS {stream} 0` |
//! | `acknowledge` | `XACK {stream} {group} {id}` |
//! | `dead_letter` | `XADD {stream}.dlq * sourceId .. reason .. <original fields>` |
//!
//! A blocking `XREADGROUP` occupies its connection for the whole block, so
//! each consumer gets its own dedicated connection for reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisError};
use seckill_core::queue::{Delivery, MessageId, OrderQueue, QueueError};
use seckill_core::{BoxFuture, OrderIntent};
use tokio::sync::Mutex;

use crate::keys::dead_letter_stream;

/// Slack on top of a read's `BLOCK` before the reply counts as lost.
const CONSUMER_RESPONSE_MARGIN: Duration = Duration::from_secs(5);
const CONSUMER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Response timeout a consumer connection needs to serve a read blocking for `block`.
fn response_timeout_for(block: Duration) -> Duration {
    block.saturating_add(CONSUMER_RESPONSE_MARGIN)
}

/// A dedicated consumer connection and the response timeout it was opened with.
#[derive(Clone)]
struct ConsumerConnection {
    conn: MultiplexedConnection,
    response_timeout: Duration,
}

/// [`OrderQueue`] backed by a `Redis` stream.
#[derive(Clone)]
pub struct RedisOrderQueue {
    client: Client,
    conn_manager: ConnectionManager,
    stream: String,
    consumers: Arc<Mutex<HashMap<String, ConsumerConnection>>>,
}

impl RedisOrderQueue {
    /// Create a queue on `stream`.
    #[must_use]
    pub fn new(client: Client, conn_manager: ConnectionManager, stream: impl Into<String>) -> Self {
        Self {
            client,
            conn_manager,
            stream: stream.into(),
            consumers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Stream name.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// The consumer's connection, reopened with a longer response timeout
    /// when `block` would outlast the current one.
    async fn consumer_connection(
        &self,
        consumer: &str,
        block: Duration,
    ) -> Result<MultiplexedConnection, QueueError> {
        let needed = response_timeout_for(block);
        let mut consumers = self.consumers.lock().await;
        if let Some(existing) = consumers.get(consumer) {
            if existing.response_timeout >= needed {
                return Ok(existing.conn.clone());
            }
        }

        let conn = self
            .client
            .get_multiplexed_async_connection_with_timeouts(needed, CONSUMER_CONNECT_TIMEOUT)
            .await
            .map_err(|e| {
                QueueError::ConnectionFailed(format!(
                    "Failed to open connection for consumer {consumer}: {e}"
                ))
            })?;

        consumers.insert(
            consumer.to_string(),
            ConsumerConnection {
                conn: conn.clone(),
                response_timeout: needed,
            },
        );
        Ok(conn)
    }

    /// Forget a consumer connection after a transport error so the next read reconnects.
    async fn drop_consumer_connection(&self, consumer: &str) {
        self.consumers.lock().await.remove(consumer);
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        start: &str,
        block: Duration,
        options: StreamReadOptions,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.consumer_connection(consumer, block).await?;

        let reply: Result<Option<StreamReadReply>, RedisError> = conn
            .xread_options(&[self.stream.as_str()], &[start], &options)
            .await;

        match reply {
            Ok(reply) => Ok(reply.map(into_deliveries).unwrap_or_default()),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() || e.is_timeout() {
                    self.drop_consumer_connection(consumer).await;
                }
                Err(read_error(group, &e))
            }
        }
    }
}

fn into_deliveries(reply: StreamReadReply) -> Vec<Delivery> {
    reply
        .keys
        .into_iter()
        .flat_map(|key| key.ids)
        .map(|entry| {
            let fields = entry
                .map
                .iter()
                .filter_map(|(name, value)| {
                    redis::from_redis_value::<String>(value)
                        .ok()
                        .map(|value| (name.clone(), value))
                })
                .collect();
            Delivery::new(MessageId::new(entry.id), fields)
        })
        .collect()
}

fn read_error(group: &str, e: &RedisError) -> QueueError {
    if e.code() == Some("NOGROUP") {
        QueueError::GroupMissing(group.to_string())
    } else if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
        QueueError::ConnectionFailed(e.to_string())
    } else {
        QueueError::ReadFailed {
            group: group.to_string(),
            reason: e.to_string(),
        }
    }
}

/// A server error reply or a refused connection means `XADD` never ran.
/// Anything else (dropped connection, timeout) may have lost the reply of a
/// stored entry.
fn append_error(stream: &str, e: &RedisError) -> QueueError {
    if e.code().is_some() || e.is_connection_refusal() {
        QueueError::AppendRejected {
            stream: stream.to_string(),
            reason: e.to_string(),
        }
    } else {
        QueueError::AppendFailed {
            stream: stream.to_string(),
            reason: e.to_string(),
        }
    }
}

impl OrderQueue for RedisOrderQueue {
    fn ensure_group(&self, group: &str) -> BoxFuture<'_, Result<(), QueueError>> {
        let group = group.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let created: Result<(), RedisError> = conn
                .xgroup_create_mkstream(&self.stream, &group, "0")
                .await;

            match created {
                Ok(()) => {
                    tracing::info!(stream = %self.stream, group = %group, "Created consumer group");
                    Ok(())
                }
                Err(e) if e.code() == Some("BUSYGROUP") => {
                    tracing::debug!(stream = %self.stream, group = %group, "Consumer group already exists");
                    Ok(())
                }
                Err(e) => Err(QueueError::Transport(format!(
                    "Failed to create consumer group {group} on {}: {e}",
                    self.stream
                ))),
            }
        })
    }

    fn append(&self, intent: &OrderIntent) -> BoxFuture<'_, Result<MessageId, QueueError>> {
        let fields = intent.to_fields();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let id: String = conn
                .xadd(&self.stream, "*", &fields)
                .await
                .map_err(|e| append_error(&self.stream, &e))?;

            Ok(MessageId::new(id))
        })
    }

    fn read_next(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> BoxFuture<'_, Result<Option<Delivery>, QueueError>> {
        let group = group.to_string();
        let consumer = consumer.to_string();
        Box::pin(async move {
            let mut options = StreamReadOptions::default().group(&group, &consumer).count(1);
            // BLOCK 0 would wait forever
            if !block.is_zero() {
                let block_ms = usize::try_from(block.as_millis()).unwrap_or(usize::MAX).max(1);
                options = options.block(block_ms);
            }

            let mut deliveries = self.read_group(&group, &consumer, ">", block, options).await?;
            Ok(if deliveries.is_empty() {
                None
            } else {
                Some(deliveries.swap_remove(0))
            })
        })
    }

    fn acknowledge(&self, group: &str, id: &MessageId) -> BoxFuture<'_, Result<(), QueueError>> {
        let group = group.to_string();
        let id = id.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let acked: i64 = conn
                .xack(&self.stream, &group, &[id.as_str()])
                .await
                .map_err(|e| QueueError::AckFailed {
                    id: id.clone(),
                    reason: e.to_string(),
                })?;

            if acked == 0 {
                tracing::debug!(message_id = %id, group = %group, "Entry was not pending at acknowledge");
            }

            Ok(())
        })
    }

    fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<Delivery>, QueueError>> {
        let group = group.to_string();
        let consumer = consumer.to_string();
        Box::pin(async move {
            let options = StreamReadOptions::default()
                .group(&group, &consumer)
                .count(count.max(1));
            self.read_group(&group, &consumer, "0", Duration::ZERO, options).await
        })
    }

    fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: &str,
    ) -> BoxFuture<'_, Result<(), QueueError>> {
        let mut fields: Vec<(String, String)> = vec![
            ("sourceId".to_string(), delivery.id.to_string()),
            ("reason".to_string(), reason.to_string()),
        ];
        fields.extend(delivery.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let dlq = dead_letter_stream(&self.stream);

            let _: String = conn
                .xadd(&dlq, "*", &fields)
                .await
                .map_err(|e| QueueError::AppendFailed {
                    stream: dlq.clone(),
                    reason: e.to_string(),
                })?;

            Ok(())
        })
    }
}

//! In-memory order stream with consumer groups.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use seckill_core::queue::{Delivery, MessageId, OrderQueue, QueueError};
use seckill_core::{BoxFuture, OrderIntent};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GroupState {
    /// Index of the next never-delivered entry.
    next: usize,
    /// Entry index -> consumer it was delivered to.
    pending: BTreeMap<usize, String>,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Vec<(MessageId, HashMap<String, String>)>,
    groups: HashMap<String, GroupState>,
    dead_letters: Vec<(Delivery, String)>,
    fail_appends: usize,
    lose_append_replies: usize,
    fail_reads: usize,
    fail_acks: usize,
}

impl QueueState {
    fn delivery(&self, index: usize) -> Delivery {
        let (id, fields) = &self.entries[index];
        Delivery::new(id.clone(), fields.clone())
    }

    fn index_of(&self, id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|(entry_id, _)| entry_id == id)
    }

    fn push(&mut self, fields: HashMap<String, String>) -> MessageId {
        let id = MessageId::new(format!("{}-0", self.entries.len() + 1));
        self.entries.push((id.clone(), fields));
        id
    }
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

/// Stream with consumer groups and per-consumer pending lists.
///
/// Blocking reads wait on a [`Notify`] that every append wakes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderQueue {
    state: Arc<Mutex<QueueState>>,
    appended: Arc<Notify>,
}

impl InMemoryOrderQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `group` without going through the async trait.
    pub fn create_group(&self, group: &str) {
        self.state
            .lock()
            .unwrap()
            .groups
            .entry(group.to_string())
            .or_default();
    }

    /// Append raw fields, bypassing the intent codec (for poison entries).
    pub fn inject_raw(&self, fields: HashMap<String, String>) -> MessageId {
        let id = self.state.lock().unwrap().push(fields);
        self.appended.notify_waiters();
        id
    }

    /// Entries ever appended.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Whether nothing was ever appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded intents in append order (undecodable entries skipped).
    #[must_use]
    pub fn intents(&self) -> Vec<OrderIntent> {
        let state = self.state.lock().unwrap();
        (0..state.entries.len())
            .filter_map(|index| state.delivery(index).intent().ok())
            .collect()
    }

    /// Pending entries of `group`, all consumers.
    #[must_use]
    pub fn pending_count(&self, group: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .groups
            .get(group)
            .map_or(0, |g| g.pending.len())
    }

    /// Dead-lettered entries with their reasons.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.state.lock().unwrap().dead_letters.clone()
    }

    /// Refuse the next `n` appends without storing them.
    pub fn fail_next_appends(&self, n: usize) {
        self.state.lock().unwrap().fail_appends = n;
    }

    /// Store the next `n` appends but report them as failed, like a reply
    /// lost after the write landed.
    pub fn lose_next_append_replies(&self, n: usize) {
        self.state.lock().unwrap().lose_append_replies = n;
    }

    /// Fail the next `n` reads (live or pending).
    pub fn fail_next_reads(&self, n: usize) {
        self.state.lock().unwrap().fail_reads = n;
    }

    /// Fail the next `n` acknowledgements.
    pub fn fail_next_acks(&self, n: usize) {
        self.state.lock().unwrap().fail_acks = n;
    }

    fn try_read_next(&self, group: &str, consumer: &str) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().unwrap();
        if take_failure(&mut state.fail_reads) {
            return Err(QueueError::ReadFailed {
                group: group.to_string(),
                reason: "injected read failure".to_string(),
            });
        }

        let total = state.entries.len();
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| QueueError::GroupMissing(group.to_string()))?;
        if group_state.next >= total {
            return Ok(None);
        }

        let index = group_state.next;
        group_state.next += 1;
        group_state.pending.insert(index, consumer.to_string());

        Ok(Some(state.delivery(index)))
    }
}

impl OrderQueue for InMemoryOrderQueue {
    fn ensure_group(&self, group: &str) -> BoxFuture<'_, Result<(), QueueError>> {
        let group = group.to_string();
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .groups
                .entry(group)
                .or_default();
            Ok(())
        })
    }

    fn append(&self, intent: &OrderIntent) -> BoxFuture<'_, Result<MessageId, QueueError>> {
        let fields = intent
            .to_fields()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Box::pin(async move {
            let (id, reply_lost) = {
                let mut state = self.state.lock().unwrap();
                if take_failure(&mut state.fail_appends) {
                    return Err(QueueError::AppendRejected {
                        stream: "memory".to_string(),
                        reason: "injected append refusal".to_string(),
                    });
                }
                let reply_lost = take_failure(&mut state.lose_append_replies);
                (state.push(fields), reply_lost)
            };
            self.appended.notify_waiters();
            if reply_lost {
                return Err(QueueError::AppendFailed {
                    stream: "memory".to_string(),
                    reason: "injected lost reply".to_string(),
                });
            }
            Ok(id)
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
            let deadline = tokio::time::Instant::now() + block;
            loop {
                // Register before checking so an append in between still wakes us
                let appended = self.appended.notified();

                if let Some(delivery) = self.try_read_next(&group, &consumer)? {
                    return Ok(Some(delivery));
                }
                if tokio::time::timeout_at(deadline, appended).await.is_err() {
                    return Ok(None);
                }
            }
        })
    }

    fn acknowledge(&self, group: &str, id: &MessageId) -> BoxFuture<'_, Result<(), QueueError>> {
        let group = group.to_string();
        let id = id.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if take_failure(&mut state.fail_acks) {
                return Err(QueueError::AckFailed {
                    id,
                    reason: "injected ack failure".to_string(),
                });
            }

            let index = state.index_of(&id);
            let group_state = state
                .groups
                .get_mut(&group)
                .ok_or_else(|| QueueError::GroupMissing(group.clone()))?;
            if let Some(index) = index {
                group_state.pending.remove(&index);
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
            let mut state = self.state.lock().unwrap();
            if take_failure(&mut state.fail_reads) {
                return Err(QueueError::ReadFailed {
                    group,
                    reason: "injected read failure".to_string(),
                });
            }

            let indices: Vec<usize> = state
                .groups
                .get(&group)
                .ok_or_else(|| QueueError::GroupMissing(group.clone()))?
                .pending
                .iter()
                .filter(|(_, owner)| **owner == consumer)
                .map(|(index, _)| *index)
                .take(count.max(1))
                .collect();

            Ok(indices.into_iter().map(|index| state.delivery(index)).collect())
        })
    }

    fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: &str,
    ) -> BoxFuture<'_, Result<(), QueueError>> {
        let delivery = delivery.clone();
        let reason = reason.to_string();
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .dead_letters
                .push((delivery, reason));
            Ok(())
        })
    }
}

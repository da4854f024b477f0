//! In-memory order repository.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use seckill_core::health::HealthProbe;
use seckill_core::repository::{OrderRepository, PersistOutcome};
use seckill_core::sale::SeckillSale;
use seckill_core::{BoxFuture, OrderId, OrderRecord, StoreError, UserId, VoucherId};

#[derive(Debug, Default)]
struct RepositoryState {
    orders: BTreeMap<OrderId, OrderRecord>,
    sales: HashMap<VoucherId, SeckillSale>,
    persist_attempts: usize,
    fail_persists: usize,
    fail_pings: usize,
}

/// Order records and sale catalogue in a map.
///
/// Enforces the same uniqueness as the relational schema: one record per
/// order id and per `(user, voucher)`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<Mutex<RepositoryState>>,
}

impl InMemoryOrderRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, by order id.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderRecord> {
        self.state.lock().unwrap().orders.values().cloned().collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().orders.len()
    }

    /// Whether there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Catalogue entry for a voucher.
    #[must_use]
    pub fn sale(&self, voucher_id: VoucherId) -> Option<SeckillSale> {
        self.state.lock().unwrap().sales.get(&voucher_id).cloned()
    }

    /// Calls to `persist`, failed ones included.
    #[must_use]
    pub fn persist_attempts(&self) -> usize {
        self.state.lock().unwrap().persist_attempts
    }

    /// Fail the next `n` persists.
    pub fn fail_next_persists(&self, n: usize) {
        self.state.lock().unwrap().fail_persists = n;
    }

    /// Fail the next `n` pings.
    pub fn fail_next_pings(&self, n: usize) {
        self.state.lock().unwrap().fail_pings = n;
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn exists_for(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .orders
                .values()
                .any(|o| o.user_id == user_id && o.voucher_id == voucher_id))
        })
    }

    fn persist(&self, record: &OrderRecord) -> BoxFuture<'_, Result<PersistOutcome, StoreError>> {
        let record = record.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.persist_attempts += 1;
            if state.fail_persists > 0 {
                state.fail_persists -= 1;
                return Err(StoreError::ConnectionFailed("injected persist failure".to_string()));
            }

            let duplicate = state.orders.contains_key(&record.order_id)
                || state
                    .orders
                    .values()
                    .any(|o| o.user_id == record.user_id && o.voucher_id == record.voucher_id);
            if duplicate {
                return Ok(PersistOutcome::AlreadyExists);
            }

            state.orders.insert(record.order_id, record);
            Ok(PersistOutcome::Created)
        })
    }

    fn find(&self, order_id: OrderId) -> BoxFuture<'_, Result<Option<OrderRecord>, StoreError>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().orders.get(&order_id).cloned()) })
    }

    fn save_sale(&self, sale: &SeckillSale) -> BoxFuture<'_, Result<(), StoreError>> {
        let sale = sale.clone();
        Box::pin(async move {
            self.state.lock().unwrap().sales.insert(sale.voucher_id, sale);
            Ok(())
        })
    }
}

impl HealthProbe for InMemoryOrderRepository {
    fn component(&self) -> &'static str {
        "memory"
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.fail_pings > 0 {
                state.fail_pings -= 1;
                return Err(StoreError::ConnectionFailed("injected ping failure".to_string()));
            }
            Ok(())
        })
    }
}

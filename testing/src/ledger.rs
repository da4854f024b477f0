//! In-memory stock ledger: admission gate plus sale registry.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use seckill_core::admission::AdmissionGate;
use seckill_core::sale::{SaleRegistry, SaleWindow, SeckillSale};
use seckill_core::{
    AdmissionOutcome, BoxFuture, OrderId, SeckillError, StoreError, UserId, VoucherId,
};

#[derive(Debug, Default)]
struct LedgerState {
    stock: HashMap<VoucherId, i64>,
    markers: HashMap<(VoucherId, UserId), OrderId>,
    windows: HashMap<VoucherId, SaleWindow>,
    fail_admissions: usize,
    fail_releases: usize,
    fail_window_reads: usize,
}

/// Stock records, eligibility markers and sale windows behind one mutex.
///
/// Every admission runs entirely under the lock, so it is as indivisible as
/// the server-side script it stands in for.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryStockLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stock of a voucher.
    pub fn set_stock(&self, voucher_id: VoucherId, stock: i64) {
        self.state.lock().unwrap().stock.insert(voucher_id, stock);
    }

    /// Remaining stock, `None` if the voucher has no stock record.
    #[must_use]
    pub fn stock(&self, voucher_id: VoucherId) -> Option<i64> {
        self.state.lock().unwrap().stock.get(&voucher_id).copied()
    }

    /// Order id recorded in the eligibility marker of `(voucher, user)`.
    #[must_use]
    pub fn marker(&self, voucher_id: VoucherId, user_id: UserId) -> Option<OrderId> {
        self.state
            .lock()
            .unwrap()
            .markers
            .get(&(voucher_id, user_id))
            .copied()
    }

    /// Number of markers for a voucher.
    #[must_use]
    pub fn marker_count(&self, voucher_id: VoucherId) -> usize {
        self.state
            .lock()
            .unwrap()
            .markers
            .keys()
            .filter(|(voucher, _)| *voucher == voucher_id)
            .count()
    }

    /// Fail the next `n` admissions with a script error.
    pub fn fail_next_admissions(&self, n: usize) {
        self.state.lock().unwrap().fail_admissions = n;
    }

    /// Fail the next `n` releases with a script error.
    pub fn fail_next_releases(&self, n: usize) {
        self.state.lock().unwrap().fail_releases = n;
    }

    /// Fail the next `n` sale window reads.
    pub fn fail_next_window_reads(&self, n: usize) {
        self.state.lock().unwrap().fail_window_reads = n;
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

impl AdmissionGate for InMemoryStockLedger {
    fn attempt_purchase(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<AdmissionOutcome, SeckillError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();

            if take_failure(&mut state.fail_admissions) {
                return Err(SeckillError::Admission("injected script failure".to_string()));
            }
            if state.markers.contains_key(&(voucher_id, user_id)) {
                return Ok(AdmissionOutcome::Duplicate);
            }
            let Some(stock) = state.stock.get_mut(&voucher_id).filter(|stock| **stock > 0) else {
                return Ok(AdmissionOutcome::OutOfStock);
            };
            *stock -= 1;
            state.markers.insert((voucher_id, user_id), order_id);

            Ok(AdmissionOutcome::Granted)
        })
    }

    fn release(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<bool, SeckillError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();

            if take_failure(&mut state.fail_releases) {
                return Err(SeckillError::Admission("injected release failure".to_string()));
            }
            if state.markers.get(&(voucher_id, user_id)) != Some(&order_id) {
                return Ok(false);
            }
            state.markers.remove(&(voucher_id, user_id));
            *state.stock.entry(voucher_id).or_insert(0) += 1;

            Ok(true)
        })
    }
}

impl SaleRegistry for InMemoryStockLedger {
    fn load_sale(&self, sale: &SeckillSale) -> BoxFuture<'_, Result<(), StoreError>> {
        let sale = sale.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.stock.insert(sale.voucher_id, sale.stock);
            state.windows.insert(sale.voucher_id, sale.window());
            Ok(())
        })
    }

    fn window(
        &self,
        voucher_id: VoucherId,
    ) -> BoxFuture<'_, Result<Option<SaleWindow>, StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if take_failure(&mut state.fail_window_reads) {
                return Err(StoreError::ConnectionFailed("injected read failure".to_string()));
            }
            Ok(state.windows.get(&voucher_id).copied())
        })
    }
}

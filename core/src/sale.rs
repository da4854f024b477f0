//! Seckill sale definitions and the registry that holds their hot-path state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SeckillError, StoreError};
use crate::types::VoucherId;
use crate::BoxFuture;

/// A voucher put on flash sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeckillSale {
    /// Voucher on sale.
    pub voucher_id: VoucherId,
    /// Units available.
    pub stock: i64,
    /// Sale opens (inclusive).
    pub begin_time: DateTime<Utc>,
    /// Sale closes (inclusive).
    pub end_time: DateTime<Utc>,
}

impl SeckillSale {
    /// Check the sale is publishable.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::InvalidSale`] if stock is not positive or the
    /// window is empty.
    pub fn validate(&self) -> Result<(), SeckillError> {
        if self.stock <= 0 {
            return Err(SeckillError::InvalidSale(format!(
                "stock must be positive, got {}",
                self.stock
            )));
        }
        if self.begin_time >= self.end_time {
            return Err(SeckillError::InvalidSale(
                "begin time must be before end time".to_string(),
            ));
        }
        Ok(())
    }

    /// The sale's window.
    #[must_use]
    pub const fn window(&self) -> SaleWindow {
        SaleWindow {
            begin: self.begin_time,
            end: self.end_time,
        }
    }
}

/// Where a sale window stands relative to an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleStatus {
    /// Before `begin`.
    NotStarted,
    /// Within `[begin, end]`.
    Active,
    /// After `end`.
    Ended,
}

/// Opening hours of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleWindow {
    /// Opens.
    pub begin: DateTime<Utc>,
    /// Closes.
    pub end: DateTime<Utc>,
}

impl SaleWindow {
    /// Status of the window at `now`.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> SaleStatus {
        if now < self.begin {
            SaleStatus::NotStarted
        } else if now > self.end {
            SaleStatus::Ended
        } else {
            SaleStatus::Active
        }
    }
}

/// Hot-path sale state: the stock record and window admission reads.
pub trait SaleRegistry: Send + Sync {
    /// Load a sale's stock and window, replacing any previous values.
    ///
    /// Stock and window are written together or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store write fails.
    fn load_sale(&self, sale: &SeckillSale) -> BoxFuture<'_, Result<(), StoreError>>;

    /// The window of a loaded sale, `None` if the voucher is not on sale.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store read fails or holds garbage.
    fn window(&self, voucher_id: VoucherId) -> BoxFuture<'_, Result<Option<SaleWindow>, StoreError>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sale(stock: i64, hours: i64) -> SeckillSale {
        let begin = Utc.with_ymd_and_hms(2026, 11, 11, 0, 0, 0).unwrap();
        SeckillSale {
            voucher_id: VoucherId(1),
            stock,
            begin_time: begin,
            end_time: begin + Duration::hours(hours),
        }
    }

    #[test]
    fn test_validate() {
        assert!(sale(100, 2).validate().is_ok());
        assert!(matches!(sale(0, 2).validate(), Err(SeckillError::InvalidSale(_))));
        assert!(matches!(sale(5, 0).validate(), Err(SeckillError::InvalidSale(_))));
    }

    #[test]
    fn test_window_status_boundaries_are_inclusive() {
        let window = sale(1, 1).window();

        assert_eq!(
            window.status_at(window.begin - Duration::seconds(1)),
            SaleStatus::NotStarted
        );
        assert_eq!(window.status_at(window.begin), SaleStatus::Active);
        assert_eq!(window.status_at(window.end), SaleStatus::Active);
        assert_eq!(
            window.status_at(window.end + Duration::seconds(1)),
            SaleStatus::Ended
        );
    }

    #[test]
    fn test_sale_json_is_camel_case() {
        let json = serde_json::to_value(sale(3, 1)).unwrap();
        assert_eq!(json["voucherId"], 1);
        assert_eq!(json["stock"], 3);
        assert!(json.get("beginTime").is_some());
        assert!(json.get("endTime").is_some());
    }
}

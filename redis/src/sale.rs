//! Sale registry: stock record and window hash.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use seckill_core::sale::{SaleRegistry, SaleWindow, SeckillSale};
use seckill_core::{BoxFuture, StoreError, VoucherId};

use crate::keys::{sale_key, stock_key};
use crate::store_error;

const BEGIN_FIELD: &str = "begin";
const END_FIELD: &str = "end";

/// [`SaleRegistry`] backed by `Redis`.
#[derive(Clone)]
pub struct RedisSaleRegistry {
    conn_manager: ConnectionManager,
}

impl RedisSaleRegistry {
    /// Create a registry on an existing connection.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

fn parse_instant(fields: &HashMap<String, String>, name: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw = fields
        .get(name)
        .ok_or_else(|| StoreError::Corrupt(format!("sale window is missing '{name}'")))?;
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| StoreError::Corrupt(format!("sale window field '{name}' is invalid: {raw:?}")))
}

impl SaleRegistry for RedisSaleRegistry {
    fn load_sale(&self, sale: &SeckillSale) -> BoxFuture<'_, Result<(), StoreError>> {
        let sale = sale.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let window_key = sale_key(sale.voucher_id);

            let _: () = redis::pipe()
                .atomic()
                .set(stock_key(sale.voucher_id), sale.stock)
                .ignore()
                .del(&window_key)
                .ignore()
                .hset_multiple(
                    &window_key,
                    &[
                        (BEGIN_FIELD, sale.begin_time.timestamp()),
                        (END_FIELD, sale.end_time.timestamp()),
                    ],
                )
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error("Failed to load sale", &e))?;

            tracing::info!(
                voucher_id = %sale.voucher_id,
                stock = sale.stock,
                "Loaded sale into Redis"
            );

            Ok(())
        })
    }

    fn window(&self, voucher_id: VoucherId) -> BoxFuture<'_, Result<Option<SaleWindow>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let fields: HashMap<String, String> = conn
                .hgetall(sale_key(voucher_id))
                .await
                .map_err(|e| store_error("Failed to read sale window", &e))?;

            if fields.is_empty() {
                return Ok(None);
            }

            Ok(Some(SaleWindow {
                begin: parse_instant(&fields, BEGIN_FIELD)?,
                end: parse_instant(&fields, END_FIELD)?,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instant_rejects_garbage() {
        let mut fields = HashMap::new();
        fields.insert(BEGIN_FIELD.to_string(), "soon".to_string());

        assert!(matches!(
            parse_instant(&fields, BEGIN_FIELD),
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(
            parse_instant(&fields, END_FIELD),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_parse_instant_reads_epoch_seconds() {
        let mut fields = HashMap::new();
        fields.insert(END_FIELD.to_string(), "1767225600".to_string());

        let parsed = parse_instant(&fields, END_FIELD);
        assert_eq!(parsed.map(|t| t.timestamp()), Ok(1_767_225_600));
    }
}

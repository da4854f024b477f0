//! Key layout.
//!
//! ```text
//! seckill:stock:{voucherId}   STRING  remaining units
//! seckill:order:{voucherId}   HASH    userId -> orderId (eligibility markers)
//! seckill:sale:{voucherId}    HASH    begin, end (epoch seconds)
//! lock:{name}                 STRING  holder token, PX lease
//! icr:{scope}:{yyyyMMdd}      STRING  daily id sequence
//! {stream}.dlq                STREAM  undecodable intents
//! ```

use seckill_core::VoucherId;

/// Stock record key.
#[must_use]
pub fn stock_key(voucher_id: VoucherId) -> String {
    format!("seckill:stock:{voucher_id}")
}

/// Eligibility marker hash key.
#[must_use]
pub fn marker_key(voucher_id: VoucherId) -> String {
    format!("seckill:order:{voucher_id}")
}

/// Sale window hash key.
#[must_use]
pub fn sale_key(voucher_id: VoucherId) -> String {
    format!("seckill:sale:{voucher_id}")
}

/// Lock key for a lock name.
#[must_use]
pub fn lock_key(name: &str) -> String {
    format!("lock:{name}")
}

/// Dead-letter stream for `stream`.
#[must_use]
pub fn dead_letter_stream(stream: &str) -> String {
    format!("{stream}.dlq")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let voucher = VoucherId(12);
        assert_eq!(stock_key(voucher), "seckill:stock:12");
        assert_eq!(marker_key(voucher), "seckill:order:12");
        assert_eq!(sale_key(voucher), "seckill:sale:12");
        assert_eq!(lock_key("order:5"), "lock:order:5");
        assert_eq!(dead_letter_stream("stream.orders"), "stream.orders.dlq");
    }
}

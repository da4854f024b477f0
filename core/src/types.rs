//! Domain types shared by every stage of the pipeline.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::SeckillError;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// The raw identifier.
            #[must_use]
            pub const fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a seckill voucher (the thing on sale).
    VoucherId
);
numeric_id!(
    /// Identifier of the purchasing user.
    UserId
);
numeric_id!(
    /// Globally unique order identifier.
    ///
    /// Layout: `(seconds since the id epoch) << 32 | daily sequence`.
    /// See [`crate::id::IdGenerator`].
    OrderId
);

impl OrderId {
    /// High 32 bits: seconds elapsed since the id epoch.
    #[must_use]
    pub const fn timestamp_part(self) -> i64 {
        self.0 >> crate::id::COUNT_BITS
    }

    /// Low 32 bits: per-day, per-scope sequence number.
    #[must_use]
    pub const fn sequence_part(self) -> i64 {
        self.0 & ((1_i64 << crate::id::COUNT_BITS) - 1)
    }
}

/// Result of the atomic admission step.
///
/// The integer codes are the wire contract of the admission script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdmissionOutcome {
    /// Stock decremented and eligibility marker recorded.
    Granted,
    /// No stock left; nothing changed.
    OutOfStock,
    /// The user already holds a marker for this voucher; nothing changed.
    Duplicate,
}

impl AdmissionOutcome {
    /// Script return code for this outcome.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Granted => 0,
            Self::OutOfStock => 1,
            Self::Duplicate => 2,
        }
    }

    /// Parse a script return code.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Admission`] for codes outside `0..=2`. An unknown
    /// code means the script and the caller disagree, which is an
    /// infrastructure fault and never a business outcome.
    pub fn from_code(code: i64) -> Result<Self, SeckillError> {
        match code {
            0 => Ok(Self::Granted),
            1 => Ok(Self::OutOfStock),
            2 => Ok(Self::Duplicate),
            other => Err(SeckillError::Admission(format!(
                "unexpected admission script result {other}"
            ))),
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::OutOfStock => "out_of_stock",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Field names of an [`OrderIntent`] on the queue.
pub mod fields {
    /// Order id field.
    pub const ORDER_ID: &str = "id";
    /// User id field.
    pub const USER_ID: &str = "userId";
    /// Voucher id field.
    pub const VOUCHER_ID: &str = "voucherId";
    /// Admission timestamp field (epoch milliseconds).
    pub const ADMITTED_AT: &str = "admittedAt";
}

/// An admitted purchase waiting to be materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Order id handed back to the client.
    pub order_id: OrderId,
    /// Buyer.
    pub user_id: UserId,
    /// Voucher bought.
    pub voucher_id: VoucherId,
    /// When the admission gate granted the unit.
    pub admitted_at: DateTime<Utc>,
}

impl OrderIntent {
    /// Create a new intent.
    #[must_use]
    pub const fn new(
        order_id: OrderId,
        user_id: UserId,
        voucher_id: VoucherId,
        admitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            user_id,
            voucher_id,
            admitted_at,
        }
    }

    /// Encode as flat string fields for a stream entry.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (fields::ORDER_ID, self.order_id.to_string()),
            (fields::USER_ID, self.user_id.to_string()),
            (fields::VOUCHER_ID, self.voucher_id.to_string()),
            (
                fields::ADMITTED_AT,
                self.admitted_at.timestamp_millis().to_string(),
            ),
        ]
    }

    /// Decode from stream entry fields.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::MalformedIntent`] if a field is missing or not a
    /// valid integer.
    pub fn from_fields(map: &HashMap<String, String>) -> Result<Self, SeckillError> {
        fn field<T: std::str::FromStr>(
            map: &HashMap<String, String>,
            name: &str,
        ) -> Result<T, SeckillError> {
            let raw = map
                .get(name)
                .ok_or_else(|| SeckillError::MalformedIntent(format!("missing field '{name}'")))?;
            raw.parse().map_err(|_| {
                SeckillError::MalformedIntent(format!("field '{name}' is not numeric: {raw:?}"))
            })
        }

        let millis: i64 = field(map, fields::ADMITTED_AT)?;
        let admitted_at = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
            SeckillError::MalformedIntent(format!("admission timestamp out of range: {millis}"))
        })?;

        Ok(Self {
            order_id: field(map, fields::ORDER_ID)?,
            user_id: field(map, fields::USER_ID)?,
            voucher_id: field(map, fields::VOUCHER_ID)?,
            admitted_at,
        })
    }
}

/// The durable order entity written by the materializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Order id (primary key).
    pub order_id: OrderId,
    /// Buyer.
    pub user_id: UserId,
    /// Voucher bought.
    pub voucher_id: VoucherId,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Build the record for an intent, stamped at `created_at`.
    #[must_use]
    pub const fn from_intent(intent: &OrderIntent, created_at: DateTime<Utc>) -> Self {
        Self {
            order_id: intent.order_id,
            user_id: intent.user_id,
            voucher_id: intent.voucher_id,
            created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn intent() -> OrderIntent {
        OrderIntent::new(
            OrderId(42),
            UserId(7),
            VoucherId(3),
            Utc.timestamp_millis_opt(1_767_225_600_123).unwrap(),
        )
    }

    fn as_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_intent_fields_decode_back() {
        let original = intent();
        let decoded = OrderIntent::from_fields(&as_map(original.to_fields())).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_intent_missing_field_is_malformed() {
        let mut map = as_map(intent().to_fields());
        map.remove(fields::USER_ID);

        let err = OrderIntent::from_fields(&map).unwrap_err();
        assert!(matches!(err, SeckillError::MalformedIntent(msg) if msg.contains("userId")));
    }

    #[test]
    fn test_intent_non_numeric_field_is_malformed() {
        let mut map = as_map(intent().to_fields());
        map.insert(fields::VOUCHER_ID.to_string(), "abc".to_string());

        assert!(matches!(
            OrderIntent::from_fields(&map),
            Err(SeckillError::MalformedIntent(_))
        ));
    }

    #[test]
    fn test_admission_codes() {
        for outcome in [
            AdmissionOutcome::Granted,
            AdmissionOutcome::OutOfStock,
            AdmissionOutcome::Duplicate,
        ] {
            assert_eq!(AdmissionOutcome::from_code(outcome.code()).unwrap(), outcome);
        }
        assert!(matches!(
            AdmissionOutcome::from_code(7),
            Err(SeckillError::Admission(_))
        ));
    }

    #[test]
    fn test_order_id_parts() {
        let id = OrderId((5_i64 << 32) | 9);
        assert_eq!(id.timestamp_part(), 5);
        assert_eq!(id.sequence_part(), 9);
    }
}

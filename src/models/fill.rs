//! Fill records.
//!
//! A fill is the immutable record of one match between a resting (maker)
//! order and an incoming or matched (taker) order. Rows are append-only;
//! nothing in the system updates a fill after insert.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::order::Outcome;

/// One fill row. `fill_price_ticks` is always the maker's resting price;
/// price improvement goes to the taker.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Fill {
    pub id: Uuid,
    pub market_id: Uuid,
    pub outcome: Outcome,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub fill_size: Decimal,
    pub fill_price_ticks: i32,
    #[serde(serialize_with = "serialize_datetime_as_millis")]
    pub created_at: DateTime<Utc>,
}

fn serialize_datetime_as_millis<S>(
    dt: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_i64(dt.timestamp_millis())
}

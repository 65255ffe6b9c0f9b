//! Order model for binary prediction markets.
//!
//! One set of canonical enums is shared by the in-memory book and the
//! database rows so the two variants cannot drift apart on vocabulary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::services::matching::{Amount, Ticks};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy shares (bid).
    Buy,
    /// Sell shares (ask).
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Which side of the binary market the order trades.
///
/// A binary market has exactly two outcome tokens; Yes and No books are
/// kept independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outcome_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Yes,
    No,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => write!(f, "yes"),
            Outcome::No => write!(f, "no"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Rests in the book at a fixed tick price until filled or cancelled.
    Limit,
    /// Matches against the opposite side regardless of price; never rests.
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

/// Order status. `Filled` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// A live order is resident in the book and matchable.
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A persisted order row.
///
/// `filled + remaining == size` holds for every non-cancelled row and is
/// backed by a table constraint; cancellation releases the unfilled
/// quantity by zeroing `remaining`.
#[derive(Debug, Clone, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_address: String,
    pub market_id: Uuid,
    pub outcome: Outcome,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// NULL for market orders.
    pub price_ticks: Option<i32>,
    pub size: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    pub signature: String,
    pub salt: Option<String>,
    pub expiry: Option<i64>,
    pub order_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_cancellable(&self) -> bool {
        self.status.is_live()
    }
}

/// A signed order intent handed in by the boundary layer.
///
/// Signature, salt, expiry and order hash are verified upstream; the
/// matching core carries them through but does not re-check them.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderIntent {
    pub maker: String,
    pub market_id: Uuid,
    pub outcome: Outcome,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Tick price (1..=10000). Required for limit orders, ignored for market.
    pub price_ticks: Option<u32>,
    /// Share quantity in 18-decimal base units, as a decimal string.
    pub size: Amount,
    pub signature: String,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub expiry: Option<i64>,
    #[serde(default)]
    pub order_hash: Option<String>,
}

/// Order projection returned to callers of the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub market_id: Uuid,
    pub outcome: Outcome,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Price in whole cents, absent for market orders.
    pub price_cents: Option<Decimal>,
    pub size: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    pub created_at: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let price_cents = order
            .price_ticks
            .and_then(|t| u32::try_from(t).ok())
            .and_then(|t| Ticks::new(t).ok())
            .map(|t| t.to_cents_decimal());
        Self {
            order_id: order.id,
            market_id: order.market_id,
            outcome: order.outcome,
            side: order.side,
            order_type: order.order_type,
            price_cents,
            size: Amount::display_from_base(order.size),
            filled: Amount::display_from_base(order.filled),
            remaining: Amount::display_from_base(order.remaining),
            status: order.status,
            created_at: order.created_at.timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn status_liveness() {
        assert!(OrderStatus::Open.is_live());
        assert!(OrderStatus::PartiallyFilled.is_live());
        assert!(!OrderStatus::Filled.is_live());
        assert!(!OrderStatus::Cancelled.is_live());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn outcome_display_roundtrip() {
        assert_eq!(Outcome::Yes.to_string(), "yes");
        assert_eq!(Outcome::No.to_string(), "no");
    }
}

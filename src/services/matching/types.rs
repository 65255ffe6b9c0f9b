//! Matching engine types.
//!
//! All share quantities are integers in 18-decimal fixed-point base units
//! ([`Amount`]); all prices are integer ticks ([`Ticks`], 1/10000 of full
//! value, so 100 ticks = 1 cent). No floating point touches the matching
//! path.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::order::{OrderSide, OrderStatus, OrderType, Outcome};

// ============================================================================
// Amount (fixed-point share quantity)
// ============================================================================

/// A share quantity in 18-decimal fixed-point base units.
///
/// Bounded to [`Decimal`]'s 96-bit mantissa so conversion for display and
/// NUMERIC binding is infallible. Arithmetic is explicit: callers pick
/// checked or saturating operations, there are no operator overloads to
/// hide overflow behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    /// Number of base units per displayed share (10^18).
    pub const SCALE: u128 = 1_000_000_000_000_000_000;

    pub const ZERO: Amount = Amount(0);

    /// Largest representable quantity: `Decimal`'s mantissa limit
    /// (2^96 - 1), also well within NUMERIC(39,0).
    pub const MAX: Amount = Amount((1u128 << 96) - 1);

    pub fn from_base_units(raw: u128) -> Result<Self, MatchingError> {
        if raw > Self::MAX.0 {
            return Err(MatchingError::InvalidAmount(format!(
                "amount {} exceeds maximum",
                raw
            )));
        }
        Ok(Amount(raw))
    }

    /// Whole shares scaled up to base units, saturating at [`Self::MAX`].
    /// Test/display helper.
    pub fn from_shares(shares: u64) -> Self {
        Amount((shares as u128).saturating_mul(Self::SCALE).min(Self::MAX.0))
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn min(self, other: Amount) -> Amount {
        Amount(self.0.min(other.0))
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        let sum = self.0.checked_add(other.0)?;
        (sum <= Self::MAX.0).then_some(Amount(sum))
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Human-readable share quantity (base units / 10^18).
    pub fn to_display_decimal(&self) -> Decimal {
        // Cannot panic: Amount is bounded to the mantissa limit on
        // construction.
        Decimal::from_i128_with_scale(self.0 as i128, 18).normalize()
    }

    /// Exact base-unit value as a Decimal, for NUMERIC(39,0) columns.
    pub fn to_base_decimal(&self) -> Decimal {
        Decimal::from_i128_with_scale(self.0 as i128, 0)
    }

    /// Parse a NUMERIC(39,0) base-unit column back into an Amount.
    pub fn try_from_base_decimal(value: Decimal) -> Result<Self, MatchingError> {
        let truncated = value.trunc();
        let raw = truncated
            .to_i128()
            .filter(|v| *v >= 0)
            .ok_or_else(|| MatchingError::InvalidAmount(format!("bad base amount {}", value)))?;
        Ok(Amount(raw as u128))
    }

    /// Convert a base-unit Decimal straight to display units, for read
    /// projections that never need an Amount.
    pub fn display_from_base(value: Decimal) -> Decimal {
        (value / Decimal::from(1_000_000_000_000_000_000u64)).normalize()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = MatchingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u128 = s
            .parse()
            .map_err(|_| MatchingError::InvalidAmount(format!("not a base-unit integer: {}", s)))?;
        Amount::from_base_units(raw)
    }
}

impl Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Ticks (integer price)
// ============================================================================

/// A limit price in ticks: 1..=10000, where 10000 is full value (100 cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticks(u32);

impl Ticks {
    pub const MAX: u32 = 10_000;
    pub const PER_CENT: u32 = 100;

    pub fn new(raw: u32) -> Result<Self, MatchingError> {
        if raw == 0 || raw > Self::MAX {
            return Err(MatchingError::InvalidPrice(format!(
                "price must be 1..={} ticks, got {}",
                Self::MAX,
                raw
            )));
        }
        Ok(Ticks(raw))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Whole-cent bucket (truncating). 4567 ticks -> 45 cents.
    pub fn whole_cents(&self) -> u32 {
        self.0 / Self::PER_CENT
    }

    /// Display price in cents with two decimals. 4050 ticks -> 40.50.
    pub fn to_cents_decimal(&self) -> Decimal {
        Decimal::new(self.0 as i64, 2)
    }

    /// Probability price in [0, 1]. 4000 ticks -> 0.4.
    pub fn to_probability(&self) -> Decimal {
        Decimal::new(self.0 as i64, 4).normalize()
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Book key and resident order entry
// ============================================================================

/// Identifies one order book: a binary market and one of its outcome tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BookKey {
    pub market_id: Uuid,
    pub outcome: Outcome,
}

impl BookKey {
    pub fn new(market_id: Uuid, outcome: Outcome) -> Self {
        Self { market_id, outcome }
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.market_id, self.outcome)
    }
}

/// A resident order in the in-memory book.
///
/// Only limit orders rest, so every entry has a tick price. The invariant
/// `filled + remaining() == size` holds because `remaining` is derived.
#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub id: Uuid,
    pub maker: String,
    pub market_id: Uuid,
    pub outcome: Outcome,
    pub side: OrderSide,
    pub price: Ticks,
    pub size: Amount,
    pub filled: Amount,
    pub status: OrderStatus,
    /// Millisecond timestamp used for time-priority tie-breaking.
    pub created_at: i64,
}

impl OrderEntry {
    pub fn remaining(&self) -> Amount {
        self.size.saturating_sub(self.filled)
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live() && !self.remaining().is_zero()
    }
}

// ============================================================================
// Fill planning (the one matching algorithm, shared by both variants)
// ============================================================================

/// One step of a fill plan: take `fill_size` from the named resting order
/// at that order's price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillPlanEntry {
    pub maker_order_id: Uuid,
    pub fill_size: Amount,
    pub fill_price: Ticks,
}

/// Walk price/time-ordered counter-orders and plan fills until the incoming
/// quantity is exhausted.
///
/// Candidates must already be filtered for price compatibility and sorted
/// best-price-first, then earliest-first at equal price; that is the
/// contract of both the in-memory book iterator and the SQL candidate
/// query. This function is pure: it mutates nothing.
pub fn plan_fills<I>(mut remaining: Amount, candidates: I) -> Vec<FillPlanEntry>
where
    I: IntoIterator<Item = (Uuid, Ticks, Amount)>,
{
    let mut plan = Vec::new();
    for (maker_order_id, price, counter_remaining) in candidates {
        if remaining.is_zero() {
            break;
        }
        let fill_size = remaining.min(counter_remaining);
        if fill_size.is_zero() {
            // An exhausted resting order should never be offered; skip it
            // rather than loop on it.
            continue;
        }
        plan.push(FillPlanEntry {
            maker_order_id,
            fill_size,
            fill_price: price,
        });
        remaining = remaining.saturating_sub(fill_size);
    }
    plan
}

/// Decide whether a resting order at `resting_price` is price-compatible
/// with an incoming order. Market orders (`limit == None`) accept any price.
pub fn price_compatible(incoming_side: OrderSide, limit: Option<Ticks>, resting_price: Ticks) -> bool {
    match (incoming_side, limit) {
        (_, None) => true,
        (OrderSide::Buy, Some(limit)) => resting_price <= limit,
        (OrderSide::Sell, Some(limit)) => resting_price >= limit,
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// One resident order as exposed by the depth query.
#[derive(Debug, Clone, Serialize)]
pub struct DepthEntry {
    pub order_id: Uuid,
    /// Price in cents (ticks / 100).
    pub price_cents: Decimal,
    pub size: Decimal,
    pub remaining: Decimal,
}

/// Read-only snapshot of one book's top `depth` orders per side.
#[derive(Debug, Clone, Serialize)]
pub struct BookSnapshot {
    pub market_id: Uuid,
    pub outcome: Outcome,
    pub bids: Vec<DepthEntry>,
    pub asks: Vec<DepthEntry>,
    pub timestamp: i64,
}

/// A new order handed to the book or the matching queries.
#[derive(Debug, Clone)]
pub struct IncomingOrder {
    pub side: OrderSide,
    pub order_type: OrderType,
    /// `None` for market orders.
    pub limit: Option<Ticks>,
    pub remaining: Amount,
}

// ============================================================================
// Errors
// ============================================================================

/// Matching core errors.
#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn amount_parse_and_display() {
        let ten_shares: Amount = "10000000000000000000".parse().unwrap();
        assert_eq!(ten_shares, Amount::from_shares(10));
        assert_eq!(ten_shares.to_display_decimal(), dec!(10));
        assert_eq!(ten_shares.to_string(), "10000000000000000000");
    }

    #[test]
    fn amount_rejects_garbage() {
        assert!("".parse::<Amount>().is_err());
        assert!("-5".parse::<Amount>().is_err());
        assert!("1.5".parse::<Amount>().is_err());
    }

    #[test]
    fn amount_bounded_by_decimal_mantissa() {
        // The largest representable quantity converts without panicking.
        let max = Amount::from_base_units(Amount::MAX.raw()).unwrap();
        assert_eq!(max.to_base_decimal().to_string(), Amount::MAX.raw().to_string());
        assert!(max.to_display_decimal() > Decimal::ZERO);

        // 2^100 parses as an integer but exceeds what Decimal can hold.
        assert!("1267650600228229401496703205376".parse::<Amount>().is_err());
        assert!(Amount::from_base_units(Amount::MAX.raw() + 1).is_err());
    }

    #[test]
    fn amount_base_decimal_roundtrip() {
        let a = Amount::from_shares(7);
        let d = a.to_base_decimal();
        assert_eq!(Amount::try_from_base_decimal(d).unwrap(), a);
    }

    #[test]
    fn amount_saturating_sub_floors_at_zero() {
        let a = Amount::from_shares(1);
        let b = Amount::from_shares(2);
        assert_eq!(a.saturating_sub(b), Amount::ZERO);
    }

    #[test]
    fn ticks_bounds() {
        assert!(Ticks::new(0).is_err());
        assert!(Ticks::new(10_001).is_err());
        assert!(Ticks::new(1).is_ok());
        assert!(Ticks::new(10_000).is_ok());
    }

    #[test]
    fn ticks_conversions() {
        let t = Ticks::new(4567).unwrap();
        assert_eq!(t.whole_cents(), 45);
        assert_eq!(t.to_cents_decimal(), dec!(45.67));
        assert_eq!(Ticks::new(4000).unwrap().to_probability(), dec!(0.4));
    }

    #[test]
    fn plan_fills_respects_remaining() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let plan = plan_fills(
            Amount::from_shares(8),
            vec![
                (a, Ticks::new(4000).unwrap(), Amount::from_shares(5)),
                (b, Ticks::new(4200).unwrap(), Amount::from_shares(5)),
            ],
        );
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].fill_size, Amount::from_shares(5));
        assert_eq!(plan[0].fill_price, Ticks::new(4000).unwrap());
        assert_eq!(plan[1].fill_size, Amount::from_shares(3));
        assert_eq!(plan[1].fill_price, Ticks::new(4200).unwrap());
    }

    #[test]
    fn plan_fills_stops_when_filled() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let plan = plan_fills(
            Amount::from_shares(4),
            vec![
                (a, Ticks::new(4000).unwrap(), Amount::from_shares(10)),
                (b, Ticks::new(4100).unwrap(), Amount::from_shares(10)),
            ],
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].fill_size, Amount::from_shares(4));
    }

    #[test]
    fn plan_fills_skips_empty_candidates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let plan = plan_fills(
            Amount::from_shares(4),
            vec![
                (a, Ticks::new(4000).unwrap(), Amount::ZERO),
                (b, Ticks::new(4100).unwrap(), Amount::from_shares(10)),
            ],
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].maker_order_id, b);
    }

    #[test]
    fn price_compatibility() {
        let limit = Some(Ticks::new(4500).unwrap());
        let low = Ticks::new(4000).unwrap();
        let high = Ticks::new(5000).unwrap();
        assert!(price_compatible(OrderSide::Buy, limit, low));
        assert!(!price_compatible(OrderSide::Buy, limit, high));
        assert!(price_compatible(OrderSide::Sell, limit, high));
        assert!(!price_compatible(OrderSide::Sell, limit, low));
        // Market orders accept anything.
        assert!(price_compatible(OrderSide::Buy, None, high));
        assert!(price_compatible(OrderSide::Sell, None, low));
    }
}

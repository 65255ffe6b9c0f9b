//! AMM price crossing checks.
//!
//! Book-to-book matching compares exact ticks, but the decision to route a
//! resting limit order to the AMM compares whole cents: the market price
//! feed is only meaningful at cent granularity, and sub-cent noise should
//! not trigger executions.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::order::{OrderSide, Outcome};
use crate::services::matching::types::OrderEntry;

/// Latest known market price for one market, as probabilities in [0, 1].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PriceSnapshot {
    pub market_id: Uuid,
    pub yes_price: Decimal,
    pub no_price: Decimal,
}

impl PriceSnapshot {
    pub fn price_for(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Yes => self.yes_price,
            Outcome::No => self.no_price,
        }
    }
}

/// Where market prices come from. The matcher is generic over this so
/// tests can drive it with a fixed table.
pub trait PriceSource: Send + Sync {
    fn latest_price(
        &self,
        market_id: Uuid,
    ) -> impl std::future::Future<Output = anyhow::Result<Option<PriceSnapshot>>> + Send;
}

/// Price source backed by the `price_snapshots` table, which the price
/// feed collaborator keeps current.
#[derive(Clone)]
pub struct PgPriceSource {
    pool: PgPool,
}

impl PgPriceSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PriceSource for PgPriceSource {
    async fn latest_price(&self, market_id: Uuid) -> anyhow::Result<Option<PriceSnapshot>> {
        let snapshot = sqlx::query_as::<_, PriceSnapshot>(
            "SELECT market_id, yes_price, no_price FROM price_snapshots WHERE market_id = $1",
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(snapshot)
    }
}

/// Whole-cent crossing rule: a buy is crossed once the market trades at or
/// below its limit, a sell once it trades at or above. The per-order check
/// and the matcher's book sweep both go through this.
pub fn crosses(side: OrderSide, market_cents: u32, limit_cents: u32) -> bool {
    match side {
        OrderSide::Buy => market_cents <= limit_cents,
        OrderSide::Sell => market_cents >= limit_cents,
    }
}

pub struct PriceChecker<P: PriceSource> {
    source: P,
}

impl<P: PriceSource> PriceChecker<P> {
    pub fn new(source: P) -> Self {
        Self { source }
    }

    /// Current market price for one outcome in whole cents, truncating
    /// sub-cent precision. `None` when no snapshot exists or the value is
    /// outside [0, 1].
    pub async fn current_market_cents(
        &self,
        market_id: Uuid,
        outcome: Outcome,
    ) -> anyhow::Result<Option<u32>> {
        let Some(snapshot) = self.source.latest_price(market_id).await? else {
            return Ok(None);
        };
        let price = snapshot.price_for(outcome);
        if price < Decimal::ZERO || price > Decimal::ONE {
            return Ok(None);
        }
        Ok((price * Decimal::ONE_HUNDRED).trunc().to_u32())
    }

    /// Whether the market has crossed this resting limit order.
    ///
    /// A buy executes once the market trades at or below its limit, a sell
    /// once the market trades at or above it. Without a price snapshot the
    /// answer is `false`: never execute on missing data.
    pub async fn should_execute(&self, order: &OrderEntry) -> anyhow::Result<bool> {
        let Some(market_cents) = self
            .current_market_cents(order.market_id, order.outcome)
            .await?
        else {
            return Ok(false);
        };
        Ok(crosses(order.side, market_cents, order.price.whole_cents()))
    }
}

//! Persistence-backed order service.
//!
//! The second variant of the matching algorithm: instead of resident
//! in-memory books, orders live in Postgres and an incoming order matches
//! against counter-orders inside one transaction. Row locks (`FOR UPDATE`)
//! on the candidate set serialize concurrent placements against the same
//! book; the fill plan itself is the same [`plan_fills`] the in-memory
//! book uses.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info};
use uuid::Uuid;

use crate::models::fill::Fill;
use crate::models::order::{
    Order, OrderIntent, OrderResponse, OrderSide, OrderStatus, OrderType, Outcome,
};
use crate::services::matching::{
    plan_fills, Amount, BookSnapshot, DepthEntry, FillPlanEntry, Ticks,
};

#[derive(Debug, thiserror::Error)]
pub enum OrderServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not the order owner")]
    Unauthorized,

    #[error("order state conflict: {0}")]
    Conflict(String),

    #[error("order not found")]
    NotFound,

    #[error("no liquidity available for market order")]
    NoLiquidity,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Placement outcome reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceStatus {
    /// Rested in the book with nothing filled.
    Open,
    /// Some quantity filled; the rest rests (or, for a market order, was
    /// cancelled).
    PartiallyFilled,
    /// Fully filled on insert.
    Matched,
}

#[derive(Debug, Clone, Serialize)]
pub struct FillSummary {
    pub maker_order_id: Uuid,
    pub fill_size: Decimal,
    pub fill_price_cents: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PlaceOrderResult {
    pub order: OrderResponse,
    pub status: PlaceStatus,
    pub fills: Vec<FillSummary>,
}

#[derive(Clone)]
pub struct OrderService {
    pool: PgPool,
}

impl OrderService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an order and match it against resting counter-orders in a
    /// single transaction.
    ///
    /// Either the order row, every touched counter-order, and every fill
    /// row commit together, or nothing does. Activity-feed rows are
    /// written after commit and never fail the placement.
    pub async fn create_order_and_match(
        &self,
        intent: OrderIntent,
    ) -> Result<PlaceOrderResult, OrderServiceError> {
        let size = intent.size;
        if size.is_zero() {
            return Err(OrderServiceError::Validation("size must be positive".into()));
        }
        let limit = match intent.order_type {
            OrderType::Limit => {
                let raw = intent.price_ticks.ok_or_else(|| {
                    OrderServiceError::Validation("limit orders require a price".into())
                })?;
                Some(Ticks::new(raw).map_err(|e| OrderServiceError::Validation(e.to_string()))?)
            }
            OrderType::Market => None,
        };

        let order_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_address, market_id, outcome, side, order_type,
                                price_ticks, size, filled, remaining, status,
                                signature, salt, expiry, order_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $8, 'open', $9, $10, $11, $12)
            "#,
        )
        .bind(order_id)
        .bind(&intent.maker)
        .bind(intent.market_id)
        .bind(intent.outcome)
        .bind(intent.side)
        .bind(intent.order_type)
        .bind(limit.map(|t| t.get() as i32))
        .bind(size.to_base_decimal())
        .bind(&intent.signature)
        .bind(&intent.salt)
        .bind(intent.expiry)
        .bind(&intent.order_hash)
        .execute(&mut *tx)
        .await?;

        let candidates = self
            .lock_candidates(&mut tx, &intent, limit)
            .await?;

        let plan = plan_fills(
            size,
            candidates.iter().filter_map(|row| {
                let price = row
                    .price_ticks
                    .and_then(|t| u32::try_from(t).ok())
                    .and_then(|t| Ticks::new(t).ok())?;
                let remaining = Amount::try_from_base_decimal(row.remaining).ok()?;
                Some((row.id, price, remaining))
            }),
        );

        // A market order that finds an empty opposite side is rejected
        // outright; nothing persists.
        if intent.order_type == OrderType::Market && plan.is_empty() {
            tx.rollback().await?;
            return Err(OrderServiceError::NoLiquidity);
        }

        let mut total_filled = Amount::ZERO;
        for fill in &plan {
            self.apply_fill(&mut tx, order_id, &intent, fill).await?;
            total_filled = total_filled
                .checked_add(fill.fill_size)
                .ok_or_else(|| OrderServiceError::Validation("fill overflow".into()))?;
        }

        let status = self
            .finish_incoming(&mut tx, order_id, intent.order_type, size, total_filled)
            .await?;

        let order: Order = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            order_id = %order_id,
            market_id = %intent.market_id,
            side = %intent.side,
            fills = plan.len(),
            status = ?status,
            "order placed"
        );

        self.record_activity(&intent, &plan);

        Ok(PlaceOrderResult {
            order: order.into(),
            status,
            fills: plan
                .into_iter()
                .map(|f| FillSummary {
                    maker_order_id: f.maker_order_id,
                    fill_size: f.fill_size.to_display_decimal(),
                    fill_price_cents: f.fill_price.to_cents_decimal(),
                })
                .collect(),
        })
    }

    /// Lock and return the price/time-ordered counter-orders this intent
    /// can trade with. `limit` of `None` (market order) matches any price.
    async fn lock_candidates(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        intent: &OrderIntent,
        limit: Option<Ticks>,
    ) -> Result<Vec<Order>, sqlx::Error> {
        // Best price first for the taker: lowest asks for a buy, highest
        // bids for a sell; ties broken by age.
        let sql = match intent.side {
            OrderSide::Buy => {
                r#"
                SELECT * FROM orders
                WHERE market_id = $1 AND outcome = $2 AND side = 'sell'
                  AND order_type = 'limit'
                  AND status IN ('open', 'partially_filled')
                  AND ($3::int IS NULL OR price_ticks <= $3)
                ORDER BY price_ticks ASC, created_at ASC
                FOR UPDATE
                "#
            }
            OrderSide::Sell => {
                r#"
                SELECT * FROM orders
                WHERE market_id = $1 AND outcome = $2 AND side = 'buy'
                  AND order_type = 'limit'
                  AND status IN ('open', 'partially_filled')
                  AND ($3::int IS NULL OR price_ticks >= $3)
                ORDER BY price_ticks DESC, created_at ASC
                FOR UPDATE
                "#
            }
        };
        sqlx::query_as(sql)
            .bind(intent.market_id)
            .bind(intent.outcome)
            .bind(limit.map(|t| t.get() as i32))
            .fetch_all(&mut **tx)
            .await
    }

    async fn apply_fill(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        taker_order_id: Uuid,
        intent: &OrderIntent,
        fill: &FillPlanEntry,
    ) -> Result<(), sqlx::Error> {
        let fill_size = fill.fill_size.to_base_decimal();

        sqlx::query(
            r#"
            UPDATE orders
            SET filled = filled + $2,
                remaining = remaining - $2,
                status = CASE WHEN remaining - $2 = 0
                              THEN 'filled'::order_status
                              ELSE 'partially_filled'::order_status END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(fill.maker_order_id)
        .bind(fill_size)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO fills (id, market_id, outcome, maker_order_id, taker_order_id,
                               fill_size, fill_price_ticks)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(intent.market_id)
        .bind(intent.outcome)
        .bind(fill.maker_order_id)
        .bind(taker_order_id)
        .bind(fill_size)
        .bind(fill.fill_price.get() as i32)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Settle the incoming order's own row and decide the reported status.
    /// A market order never rests: any unmatched remainder is cancelled.
    async fn finish_incoming(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: Uuid,
        order_type: OrderType,
        size: Amount,
        total_filled: Amount,
    ) -> Result<PlaceStatus, sqlx::Error> {
        let (row_status, place_status) = if total_filled == size {
            (OrderStatus::Filled, PlaceStatus::Matched)
        } else if order_type == OrderType::Market {
            // Market orders never rest; the unfilled remainder cancels.
            (OrderStatus::Cancelled, PlaceStatus::PartiallyFilled)
        } else if total_filled.is_zero() {
            (OrderStatus::Open, PlaceStatus::Open)
        } else {
            (OrderStatus::PartiallyFilled, PlaceStatus::PartiallyFilled)
        };

        // A cancelled market-order remainder releases its quantity.
        let remaining = if row_status == OrderStatus::Cancelled {
            Amount::ZERO
        } else {
            size.saturating_sub(total_filled)
        };
        sqlx::query(
            r#"
            UPDATE orders
            SET filled = $2, remaining = $3, status = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(total_filled.to_base_decimal())
        .bind(remaining.to_base_decimal())
        .bind(row_status)
        .execute(&mut **tx)
        .await?;

        Ok(place_status)
    }

    /// Best-effort activity feed rows, written after commit. Failures are
    /// logged, never surfaced.
    fn record_activity(&self, intent: &OrderIntent, plan: &[FillPlanEntry]) {
        if plan.is_empty() {
            return;
        }
        let pool = self.pool.clone();
        let market_id = intent.market_id;
        let outcome = intent.outcome;
        let taker = intent.maker.clone();
        let taker_side = intent.side;
        let rows: Vec<(Uuid, Decimal, i32)> = plan
            .iter()
            .map(|f| {
                (
                    f.maker_order_id,
                    f.fill_size.to_base_decimal(),
                    f.fill_price.get() as i32,
                )
            })
            .collect();

        tokio::spawn(async move {
            for (maker_order_id, fill_size, price_ticks) in rows {
                let result = sqlx::query(
                    r#"
                    INSERT INTO trade_activity (id, market_id, outcome, maker, taker,
                                                taker_side, price_ticks, size)
                    SELECT $1, $2, $3, o.user_address, $4, $5, $6, $7
                    FROM orders o WHERE o.id = $8
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(market_id)
                .bind(outcome)
                .bind(&taker)
                .bind(taker_side)
                .bind(price_ticks)
                .bind(fill_size)
                .bind(maker_order_id)
                .execute(&pool)
                .await;
                if let Err(e) = result {
                    error!(market_id = %market_id, error = %e, "activity insert failed");
                }
            }
        });
    }

    /// Cancel a live order owned by `user_address`.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        user_address: &str,
    ) -> Result<OrderResponse, OrderServiceError> {
        let mut tx = self.pool.begin().await?;

        let order: Order = sqlx::query_as("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(OrderServiceError::NotFound)?;

        if order.user_address != user_address {
            return Err(OrderServiceError::Unauthorized);
        }
        if !order.is_cancellable() {
            return Err(OrderServiceError::Conflict(format!(
                "order is {}",
                order.status
            )));
        }

        let cancelled: Order = sqlx::query_as(
            r#"
            UPDATE orders
            SET status = 'cancelled', remaining = 0, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(order_id = %order_id, "order cancelled");
        Ok(cancelled.into())
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, OrderServiceError> {
        let order: Order = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(OrderServiceError::NotFound)?;
        Ok(order.into())
    }

    /// A user's orders, newest first, optionally restricted to one market.
    pub async fn get_user_orders(
        &self,
        user_address: &str,
        market_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<OrderResponse>, OrderServiceError> {
        let orders: Vec<Order> = sqlx::query_as(
            r#"
            SELECT * FROM orders
            WHERE user_address = $1
              AND ($2::uuid IS NULL OR market_id = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_address)
        .bind(market_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders.into_iter().map(Into::into).collect())
    }

    /// Recent fills for one book, newest first.
    pub async fn get_market_fills(
        &self,
        market_id: Uuid,
        outcome: Outcome,
        limit: i64,
    ) -> Result<Vec<FillSummary>, OrderServiceError> {
        let fills: Vec<Fill> = sqlx::query_as(
            r#"
            SELECT * FROM fills
            WHERE market_id = $1 AND outcome = $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(market_id)
        .bind(outcome)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(fills
            .into_iter()
            .filter_map(|f| {
                let ticks = u32::try_from(f.fill_price_ticks)
                    .ok()
                    .and_then(|t| Ticks::new(t).ok())?;
                Some(FillSummary {
                    maker_order_id: f.maker_order_id,
                    fill_size: Amount::display_from_base(f.fill_size),
                    fill_price_cents: ticks.to_cents_decimal(),
                })
            })
            .collect())
    }

    /// Depth view built from persisted live orders, priority-ordered like
    /// the in-memory snapshot.
    pub async fn get_order_book(
        &self,
        market_id: Uuid,
        outcome: Outcome,
        depth: i64,
    ) -> Result<BookSnapshot, OrderServiceError> {
        let bids = self.depth_side(market_id, outcome, OrderSide::Buy, depth).await?;
        let asks = self.depth_side(market_id, outcome, OrderSide::Sell, depth).await?;
        Ok(BookSnapshot {
            market_id,
            outcome,
            bids,
            asks,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    async fn depth_side(
        &self,
        market_id: Uuid,
        outcome: Outcome,
        side: OrderSide,
        depth: i64,
    ) -> Result<Vec<DepthEntry>, sqlx::Error> {
        let sql = match side {
            OrderSide::Buy => {
                r#"
                SELECT * FROM orders
                WHERE market_id = $1 AND outcome = $2 AND side = 'buy'
                  AND order_type = 'limit'
                  AND status IN ('open', 'partially_filled')
                ORDER BY price_ticks DESC, created_at ASC
                LIMIT $3
                "#
            }
            OrderSide::Sell => {
                r#"
                SELECT * FROM orders
                WHERE market_id = $1 AND outcome = $2 AND side = 'sell'
                  AND order_type = 'limit'
                  AND status IN ('open', 'partially_filled')
                ORDER BY price_ticks ASC, created_at ASC
                LIMIT $3
                "#
            }
        };
        let rows: Vec<Order> = sqlx::query_as(sql)
            .bind(market_id)
            .bind(outcome)
            .bind(depth)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|o| {
                let ticks = o
                    .price_ticks
                    .and_then(|t| u32::try_from(t).ok())
                    .and_then(|t| Ticks::new(t).ok())?;
                Some(DepthEntry {
                    order_id: o.id,
                    price_cents: ticks.to_cents_decimal(),
                    size: Amount::display_from_base(o.size),
                    remaining: Amount::display_from_base(o.remaining),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    // Validation runs before any query, so a lazy pool that never connects
    // is enough for these.
    fn service() -> OrderService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        OrderService::new(pool)
    }

    fn intent(order_type: OrderType, price_ticks: Option<u32>, size: &str) -> OrderIntent {
        OrderIntent {
            maker: "0xabc".into(),
            market_id: Uuid::new_v4(),
            outcome: Outcome::Yes,
            side: OrderSide::Buy,
            order_type,
            price_ticks,
            size: size.parse().unwrap(),
            signature: "0xsig".into(),
            salt: None,
            expiry: None,
            order_hash: None,
        }
    }

    #[tokio::test]
    async fn rejects_zero_size() {
        let result = service()
            .create_order_and_match(intent(OrderType::Limit, Some(5000), "0"))
            .await;
        assert!(matches!(result, Err(OrderServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn rejects_limit_order_without_price() {
        let result = service()
            .create_order_and_match(intent(OrderType::Limit, None, "1000000000000000000"))
            .await;
        assert!(matches!(result, Err(OrderServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn rejects_out_of_range_price() {
        let result = service()
            .create_order_and_match(intent(OrderType::Limit, Some(10_001), "1000000000000000000"))
            .await;
        assert!(matches!(result, Err(OrderServiceError::Validation(_))));

        let result = service()
            .create_order_and_match(intent(OrderType::Limit, Some(0), "1000000000000000000"))
            .await;
        assert!(matches!(result, Err(OrderServiceError::Validation(_))));
    }
}


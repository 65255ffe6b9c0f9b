//! Settlement workers.
//!
//! The matcher never touches the database; it emits match and AMM-execution
//! events onto bounded queues and these workers persist them. Worker
//! failures are logged and isolated: a bad event never stops the queue and
//! never propagates back into the matching path.

use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::order::{OrderSide, Outcome};
use crate::services::matching::{Amount, OrderEntry, Ticks};

/// One resolved match between two resting orders.
#[derive(Debug, Clone)]
pub struct SettlementInstruction {
    pub trade_id: Uuid,
    pub market_id: Uuid,
    pub outcome: Outcome,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker: String,
    pub taker: String,
    pub taker_side: OrderSide,
    pub fill_size: Amount,
    /// Always the maker's resting price.
    pub fill_price: Ticks,
    pub timestamp: i64,
}

/// A resting order handed off for execution against the AMM.
#[derive(Debug, Clone)]
pub struct AmmExecution {
    pub order: OrderEntry,
    /// Market price in whole cents at hand-off time.
    pub market_cents: u32,
}

/// Persists matches produced by the in-memory matcher.
pub struct SettlementService {
    pool: PgPool,
    queue_tx: mpsc::Sender<SettlementInstruction>,
    queue_rx: Option<mpsc::Receiver<SettlementInstruction>>,
}

impl SettlementService {
    pub fn new(pool: PgPool, queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        Self {
            pool,
            queue_tx,
            queue_rx: Some(queue_rx),
        }
    }

    /// Start the settlement worker. Returns the queue sender.
    pub fn start_worker(mut self) -> mpsc::Sender<SettlementInstruction> {
        let queue_tx = self.queue_tx.clone();
        let mut queue_rx = self.queue_rx.take().expect("worker already started");

        tokio::spawn(async move {
            info!("settlement worker started");
            while let Some(instruction) = queue_rx.recv().await {
                if let Err(e) = self.record_match(&instruction).await {
                    error!(trade_id = %instruction.trade_id, error = %e, "failed to persist match");
                }
            }
            info!("settlement worker stopped");
        });

        queue_tx
    }

    /// Persist one match: both order rows, the fill, and the activity row,
    /// in a single transaction.
    async fn record_match(&self, instruction: &SettlementInstruction) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let fill_size = instruction.fill_size.to_base_decimal();

        for order_id in [instruction.maker_order_id, instruction.taker_order_id] {
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
            .bind(order_id)
            .bind(fill_size)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO fills (id, market_id, outcome, maker_order_id, taker_order_id,
                               fill_size, fill_price_ticks)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(instruction.trade_id)
        .bind(instruction.market_id)
        .bind(instruction.outcome)
        .bind(instruction.maker_order_id)
        .bind(instruction.taker_order_id)
        .bind(fill_size)
        .bind(instruction.fill_price.get() as i32)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO trade_activity (id, market_id, outcome, maker, taker,
                                        taker_side, price_ticks, size)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(instruction.market_id)
        .bind(instruction.outcome)
        .bind(&instruction.maker)
        .bind(&instruction.taker)
        .bind(instruction.taker_side)
        .bind(instruction.fill_price.get() as i32)
        .bind(fill_size)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            trade_id = %instruction.trade_id,
            market_id = %instruction.market_id,
            fill_size = %instruction.fill_size,
            fill_price_ticks = %instruction.fill_price,
            "match persisted"
        );
        Ok(())
    }
}

/// Executes AMM hand-offs: orders whose limit the market price has crossed.
///
/// Actual AMM execution (on-chain swap and proceeds transfer) happens in a
/// downstream system; this worker marks the order executed and records the
/// activity so the hand-off is durable and happens at most once per order.
pub struct AmmExecutionService {
    pool: PgPool,
    queue_tx: mpsc::Sender<AmmExecution>,
    queue_rx: Option<mpsc::Receiver<AmmExecution>>,
}

impl AmmExecutionService {
    pub fn new(pool: PgPool, queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        Self {
            pool,
            queue_tx,
            queue_rx: Some(queue_rx),
        }
    }

    pub fn start_worker(mut self) -> mpsc::Sender<AmmExecution> {
        let queue_tx = self.queue_tx.clone();
        let mut queue_rx = self.queue_rx.take().expect("worker already started");

        tokio::spawn(async move {
            info!("amm execution worker started");
            while let Some(execution) = queue_rx.recv().await {
                if let Err(e) = self.execute(&execution).await {
                    error!(order_id = %execution.order.id, error = %e, "amm execution failed");
                }
            }
            info!("amm execution worker stopped");
        });

        queue_tx
    }

    async fn execute(&self, execution: &AmmExecution) -> anyhow::Result<()> {
        let order = &execution.order;
        let remaining = order.remaining().to_base_decimal();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET filled = size, remaining = 0,
                status = 'filled'::order_status, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO trade_activity (id, market_id, outcome, maker, taker,
                                        taker_side, price_ticks, size)
            VALUES ($1, $2, $3, $4, 'amm', $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.market_id)
        .bind(order.outcome)
        .bind(&order.maker)
        .bind(order.side)
        .bind(order.price.get() as i32)
        .bind(remaining)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            order_id = %order.id,
            market_cents = execution.market_cents,
            "order executed against amm"
        );
        Ok(())
    }
}

//! Periodic order matcher.
//!
//! Each scan walks every live book, resolves crossing resting pairs, then
//! sweeps for resting orders whose limit the market price has crossed and
//! hands those to the AMM queue. All queue emission is `try_send`: the
//! matching loop never blocks on a consumer, and a full queue is an error
//! to log, not a reason to stall the scan.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::matching::engine::MatchingEngine;
use crate::services::matching::orderbook::Orderbook;
use crate::services::matching::price_checker::{crosses, PriceChecker, PriceSource};
use crate::services::matching::types::BookKey;
use crate::services::settlement::{AmmExecution, SettlementInstruction};

pub struct OrderMatcher<P: PriceSource> {
    engine: Arc<MatchingEngine>,
    price_checker: PriceChecker<P>,
    settlement_tx: mpsc::Sender<SettlementInstruction>,
    amm_tx: mpsc::Sender<AmmExecution>,
}

/// Stops a running matcher. The in-flight scan finishes before the task
/// exits.
pub struct MatcherHandle {
    stop_tx: watch::Sender<bool>,
}

impl MatcherHandle {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl<P: PriceSource + 'static> OrderMatcher<P> {
    pub fn new(
        engine: Arc<MatchingEngine>,
        price_checker: PriceChecker<P>,
        settlement_tx: mpsc::Sender<SettlementInstruction>,
        amm_tx: mpsc::Sender<AmmExecution>,
    ) -> Self {
        Self {
            engine,
            price_checker,
            settlement_tx,
            amm_tx,
        }
    }

    /// Spawn the scan loop. The first scan runs immediately, then every
    /// `interval_ms` until the handle is stopped.
    pub fn start(self, interval_ms: u64) -> MatcherHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            info!(interval_ms, "order matcher started");
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_scan().await;
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("order matcher stopped");
        });
        MatcherHandle { stop_tx }
    }

    /// One full pass over every book. A failure in one book is logged and
    /// the scan moves on to the next.
    pub async fn run_scan(&self) {
        for key in self.engine.keys() {
            let Some(book) = self.engine.existing_book(key) else {
                continue;
            };
            self.match_crossing_orders(&book);
            if let Err(e) = self.sweep_amm_crossings(key, &book).await {
                error!(book = %key, error = %e, "amm sweep failed");
            }
        }
    }

    /// Resolve book-to-book crossings: while the best bid meets or exceeds
    /// the best ask, fill the pair at the maker's price. The maker is the
    /// earlier-created order. Synchronous on purpose, no await between the
    /// reads and the fills.
    fn match_crossing_orders(&self, book: &Orderbook) {
        loop {
            let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) else {
                break;
            };
            if bid.price < ask.price {
                break;
            }

            let fill_size = bid.remaining().min(ask.remaining());
            if fill_size.is_zero() {
                // Both entries were live a moment ago; treat this as a
                // corrupt pair rather than spinning on it.
                warn!(bid = %bid.id, ask = %ask.id, "zero-size crossing pair, aborting book scan");
                break;
            }

            let (maker, taker) = if bid.created_at <= ask.created_at {
                (&bid, &ask)
            } else {
                (&ask, &bid)
            };
            let fill_price = maker.price;

            if let Err(e) = book
                .fill_order(bid.id, fill_size)
                .and_then(|_| book.fill_order(ask.id, fill_size))
            {
                error!(book = %book.key(), error = %e, "fill failed mid-cross, aborting book scan");
                break;
            }

            let instruction = SettlementInstruction {
                trade_id: Uuid::new_v4(),
                market_id: maker.market_id,
                outcome: maker.outcome,
                maker_order_id: maker.id,
                taker_order_id: taker.id,
                maker: maker.maker.clone(),
                taker: taker.maker.clone(),
                taker_side: taker.side,
                fill_size,
                fill_price,
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            debug!(
                trade_id = %instruction.trade_id,
                fill_size = %fill_size,
                fill_price_ticks = %fill_price,
                "crossing pair matched"
            );
            if let Err(e) = self.settlement_tx.try_send(instruction) {
                error!(error = %e, "settlement queue rejected match event");
            }
        }
    }

    /// Hand resting orders whose limit the market has crossed to the AMM
    /// queue. Ownership transfers on a successful enqueue; a rejected
    /// enqueue leaves the order resident for the next scan.
    async fn sweep_amm_crossings(
        &self,
        key: BookKey,
        book: &Orderbook,
    ) -> anyhow::Result<()> {
        let Some(market_cents) = self
            .price_checker
            .current_market_cents(key.market_id, key.outcome)
            .await?
        else {
            return Ok(());
        };

        // Best bid carries the highest buy limit and best ask the lowest
        // sell limit, so each side can stop at the first non-crossing order.
        while let Some(bid) = book.best_bid() {
            if !crosses(bid.side, market_cents, bid.price.whole_cents()) {
                break;
            }
            if !self.hand_off(book, bid.id, market_cents) {
                break; // queue full, retry next scan
            }
        }
        while let Some(ask) = book.best_ask() {
            if !crosses(ask.side, market_cents, ask.price.whole_cents()) {
                break;
            }
            if !self.hand_off(book, ask.id, market_cents) {
                break;
            }
        }
        Ok(())
    }

    /// Returns whether the order left the book, so sweep loops stop instead
    /// of re-reading the same best entry.
    fn hand_off(&self, book: &Orderbook, order_id: Uuid, market_cents: u32) -> bool {
        let Some(order) = book.take_order(order_id) else {
            return false;
        };
        match self.amm_tx.try_send(AmmExecution {
            order: order.clone(),
            market_cents,
        }) {
            Ok(()) => {
                debug!(order_id = %order.id, market_cents, "order handed to amm queue");
                true
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "amm queue full, order stays resident");
                // Put it back; the next scan retries.
                if let Err(e) = book.add_order(order) {
                    error!(order_id = %order_id, error = %e, "failed to restore order after amm reject");
                }
                false
            }
        }
    }
}

//! Matching engine: the registry of live order books.
//!
//! Books are created lazily per (market, outcome) and shared behind `Arc`
//! so the matcher task, the order service and the query surface all see
//! the same book.

use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::order::{Order, OrderType};
use crate::services::matching::orderbook::Orderbook;
use crate::services::matching::types::{
    Amount, BookKey, BookSnapshot, MatchingError, OrderEntry, Ticks,
};

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub books: usize,
    pub resident_orders: usize,
}

pub struct MatchingEngine {
    books: DashMap<BookKey, Arc<Orderbook>>,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    /// Get or lazily create the book for a key.
    pub fn book(&self, key: BookKey) -> Arc<Orderbook> {
        self.books
            .entry(key)
            .or_insert_with(|| Arc::new(Orderbook::new(key)))
            .clone()
    }

    /// The book for a key, if one exists. Queries use this so a lookup
    /// does not allocate empty books.
    pub fn existing_book(&self, key: BookKey) -> Option<Arc<Orderbook>> {
        self.books.get(&key).map(|b| b.clone())
    }

    pub fn keys(&self) -> Vec<BookKey> {
        self.books.iter().map(|e| *e.key()).collect()
    }

    pub fn add_order(&self, entry: OrderEntry) -> Result<(), MatchingError> {
        let key = BookKey::new(entry.market_id, entry.outcome);
        self.book(key).add_order(entry)
    }

    pub fn cancel_order(&self, key: BookKey, order_id: Uuid) -> Option<OrderEntry> {
        self.existing_book(key)?.cancel_order(order_id)
    }

    pub fn snapshot(&self, key: BookKey, depth: usize) -> Option<BookSnapshot> {
        self.existing_book(key).map(|b| b.snapshot(depth))
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            books: self.books.len(),
            resident_orders: self.books.iter().map(|e| e.value().order_count()).sum(),
        }
    }

    /// Rebuild the in-memory books from persisted live limit orders.
    ///
    /// Runs once at startup, before the matcher starts. Rows the book
    /// rejects (bad price, zero remaining) are logged and skipped so one
    /// corrupt row cannot block recovery.
    pub async fn recover_orders(&self, pool: &PgPool) -> Result<usize, sqlx::Error> {
        let rows: Vec<Order> = sqlx::query_as(
            r#"
            SELECT * FROM orders
            WHERE status IN ('open', 'partially_filled')
              AND order_type = 'limit'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut recovered = 0usize;
        for row in rows {
            match order_entry_from_row(&row) {
                Ok(entry) => match self.add_order(entry) {
                    Ok(()) => recovered += 1,
                    Err(e) => warn!(order_id = %row.id, error = %e, "skipping order during recovery"),
                },
                Err(e) => warn!(order_id = %row.id, error = %e, "unreadable order row during recovery"),
            }
        }
        info!(recovered, books = self.books.len(), "order book recovery complete");
        Ok(recovered)
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a persisted order row into a book entry.
fn order_entry_from_row(row: &Order) -> Result<OrderEntry, MatchingError> {
    if row.order_type != OrderType::Limit {
        return Err(MatchingError::InvalidPrice(
            "market orders never rest in the book".into(),
        ));
    }
    let raw_ticks = row
        .price_ticks
        .and_then(|t| u32::try_from(t).ok())
        .ok_or_else(|| MatchingError::InvalidPrice("limit order without a price".into()))?;
    Ok(OrderEntry {
        id: row.id,
        maker: row.user_address.clone(),
        market_id: row.market_id,
        outcome: row.outcome,
        side: row.side,
        price: Ticks::new(raw_ticks)?,
        size: Amount::try_from_base_decimal(row.size)?,
        filled: Amount::try_from_base_decimal(row.filled)?,
        status: row.status,
        created_at: row.created_at.timestamp_millis(),
    })
}

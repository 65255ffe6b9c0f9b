//! In-memory order book for one (market, outcome) pair.
//!
//! Two sides, each a price-keyed map of FIFO queues. Strict price/time
//! priority: bids match best (highest) price first, asks best (lowest)
//! first, and within a price level the earliest order fills first. No
//! pro-rata allocation.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use crate::models::order::{OrderSide, OrderStatus};
use crate::services::matching::types::{
    plan_fills, price_compatible, Amount, BookKey, BookSnapshot, DepthEntry, FillPlanEntry,
    IncomingOrder, MatchingError, OrderEntry, Ticks,
};

pub struct Orderbook {
    key: BookKey,
    /// Buy side. Best bid is the highest key.
    bids: RwLock<BTreeMap<Ticks, VecDeque<OrderEntry>>>,
    /// Sell side. Best ask is the lowest key.
    asks: RwLock<BTreeMap<Ticks, VecDeque<OrderEntry>>>,
    /// Order id -> (side, price level) for O(log n) cancel and fill.
    index: DashMap<Uuid, (OrderSide, Ticks)>,
}

impl Orderbook {
    pub fn new(key: BookKey) -> Self {
        Self {
            key,
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            index: DashMap::new(),
        }
    }

    pub fn key(&self) -> BookKey {
        self.key
    }

    fn side(&self, side: OrderSide) -> &RwLock<BTreeMap<Ticks, VecDeque<OrderEntry>>> {
        match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        }
    }

    /// Insert a resting limit order.
    ///
    /// The queue at each price level stays sorted by `created_at`, so
    /// recovery can replay persisted orders in any arrival order and end
    /// up with the same book.
    pub fn add_order(&self, entry: OrderEntry) -> Result<(), MatchingError> {
        if entry.remaining().is_zero() {
            return Err(MatchingError::InvalidAmount(format!(
                "order {} has nothing remaining",
                entry.id
            )));
        }
        if self.index.contains_key(&entry.id) {
            return Err(MatchingError::InvalidAmount(format!(
                "order {} already resident",
                entry.id
            )));
        }

        let id = entry.id;
        let side = entry.side;
        let price = entry.price;
        {
            let mut book = self.side(side).write();
            let queue = book.entry(price).or_default();
            let pos = queue
                .iter()
                .position(|resident| resident.created_at > entry.created_at)
                .unwrap_or(queue.len());
            queue.insert(pos, entry);
        }
        self.index.insert(id, (side, price));
        Ok(())
    }

    /// Plan fills for an incoming order against the opposite side.
    ///
    /// Walks price levels best-first and stops at the first level that is
    /// not price-compatible. Market orders (`limit == None`) sweep every
    /// level. Pure: nothing in the book changes.
    pub fn find_matches(&self, incoming: &IncomingOrder) -> Vec<FillPlanEntry> {
        if incoming.remaining.is_zero() {
            return Vec::new();
        }

        let counter_side = incoming.side.opposite();
        let book = self.side(counter_side).read();

        let mut candidates: Vec<(Uuid, Ticks, Amount)> = Vec::new();
        let mut needed = incoming.remaining;

        // Best-first iteration: asks ascend, bids descend.
        let levels: Box<dyn Iterator<Item = (&Ticks, &VecDeque<OrderEntry>)>> = match counter_side {
            OrderSide::Sell => Box::new(book.iter()),
            OrderSide::Buy => Box::new(book.iter().rev()),
        };

        'levels: for (price, queue) in levels {
            if !price_compatible(incoming.side, incoming.limit, *price) {
                break;
            }
            for resident in queue {
                if !resident.is_live() {
                    continue;
                }
                let available = resident.remaining();
                candidates.push((resident.id, *price, available));
                needed = needed.saturating_sub(available);
                if needed.is_zero() {
                    break 'levels;
                }
            }
        }
        drop(book);

        plan_fills(incoming.remaining, candidates)
    }

    /// Record a fill against a resident order.
    ///
    /// The amount is clamped to what remains; a fully filled order leaves
    /// the book. Returns the entry as it stands after the fill.
    pub fn fill_order(&self, order_id: Uuid, amount: Amount) -> Result<OrderEntry, MatchingError> {
        let (side, price) = self
            .index
            .get(&order_id)
            .map(|loc| *loc)
            .ok_or(MatchingError::OrderNotFound(order_id))?;

        let mut book = self.side(side).write();
        let queue = book
            .get_mut(&price)
            .ok_or(MatchingError::OrderNotFound(order_id))?;
        let pos = queue
            .iter()
            .position(|o| o.id == order_id)
            .ok_or(MatchingError::OrderNotFound(order_id))?;

        let entry = &mut queue[pos];
        let applied = amount.min(entry.remaining());
        entry.filled = entry
            .filled
            .checked_add(applied)
            .ok_or_else(|| MatchingError::InvalidAmount("fill overflow".into()))?;
        entry.status = if entry.remaining().is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        let updated = entry.clone();

        if updated.status == OrderStatus::Filled {
            queue.remove(pos);
            if queue.is_empty() {
                book.remove(&price);
            }
            self.index.remove(&order_id);
        }
        Ok(updated)
    }

    /// Remove an order by id. Returns the entry, marked cancelled, or
    /// `None` if it is not resident.
    pub fn cancel_order(&self, order_id: Uuid) -> Option<OrderEntry> {
        let mut entry = self.remove(order_id)?;
        entry.status = OrderStatus::Cancelled;
        Some(entry)
    }

    /// Remove an order by id without changing its status. Used when
    /// ownership of the order transfers elsewhere (AMM execution).
    pub fn take_order(&self, order_id: Uuid) -> Option<OrderEntry> {
        self.remove(order_id)
    }

    fn remove(&self, order_id: Uuid) -> Option<OrderEntry> {
        let (_, (side, price)) = self.index.remove(&order_id)?;
        let mut book = self.side(side).write();
        let queue = book.get_mut(&price)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            book.remove(&price);
        }
        entry
    }

    /// Highest-priced resident buy order, earliest first at that price.
    pub fn best_bid(&self) -> Option<OrderEntry> {
        let book = self.bids.read();
        book.iter()
            .rev()
            .flat_map(|(_, queue)| queue.iter())
            .find(|o| o.is_live())
            .cloned()
    }

    /// Lowest-priced resident sell order, earliest first at that price.
    pub fn best_ask(&self) -> Option<OrderEntry> {
        let book = self.asks.read();
        book.iter()
            .flat_map(|(_, queue)| queue.iter())
            .find(|o| o.is_live())
            .cloned()
    }

    pub fn get_order(&self, order_id: Uuid) -> Option<OrderEntry> {
        let (side, price) = self.index.get(&order_id).map(|loc| *loc)?;
        let book = self.side(side).read();
        book.get(&price)?.iter().find(|o| o.id == order_id).cloned()
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Top `depth` orders per side, in priority order.
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        let depth_of = |entry: &OrderEntry| DepthEntry {
            order_id: entry.id,
            price_cents: entry.price.to_cents_decimal(),
            size: entry.size.to_display_decimal(),
            remaining: entry.remaining().to_display_decimal(),
        };

        let bids = {
            let book = self.bids.read();
            book.iter()
                .rev()
                .flat_map(|(_, queue)| queue.iter())
                .filter(|o| o.is_live())
                .take(depth)
                .map(depth_of)
                .collect()
        };
        let asks = {
            let book = self.asks.read();
            book.iter()
                .flat_map(|(_, queue)| queue.iter())
                .filter(|o| o.is_live())
                .take(depth)
                .map(depth_of)
                .collect()
        };

        BookSnapshot {
            market_id: self.key.market_id,
            outcome: self.key.outcome,
            bids,
            asks,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

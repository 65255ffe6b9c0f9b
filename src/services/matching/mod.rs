//! In-memory matching: order books, the engine registry, the periodic
//! matcher, and the AMM price checker.

pub mod engine;
pub mod matcher;
pub mod orderbook;
pub mod price_checker;
pub mod types;

pub use engine::{EngineStats, MatchingEngine};
pub use matcher::{MatcherHandle, OrderMatcher};
pub use orderbook::Orderbook;
pub use price_checker::{crosses, PgPriceSource, PriceChecker, PriceSnapshot, PriceSource};
pub use types::{
    plan_fills, price_compatible, Amount, BookKey, BookSnapshot, DepthEntry, FillPlanEntry,
    IncomingOrder, MatchingError, OrderEntry, Ticks,
};

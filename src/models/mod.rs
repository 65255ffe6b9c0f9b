//! Data models shared between the in-memory matching engine and the
//! persistence-backed order service.

pub mod fill;
pub mod order;

pub use fill::Fill;
pub use order::{Order, OrderIntent, OrderResponse, OrderSide, OrderStatus, OrderType, Outcome};

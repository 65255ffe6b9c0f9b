//! Off-chain order book and matching engine for binary prediction markets.
//!
//! Two matching variants share one algorithm: the in-memory engine
//! ([`services::matching`]) that the periodic matcher scans, and the
//! persistence-backed order service ([`services::orders`]) that matches an
//! incoming order inside a single database transaction.

pub mod config;
pub mod db;
pub mod models;
pub mod services;

//! `binflow-ledger` — the authoritative inventory ledger.
//!
//! One `StockLevel` aggregate per (SKU, bin location) pair. Every mutation is
//! an appended `StockMoved` event carrying actor, reason, and before/after
//! quantities; current balances are materialized views over that log.

pub mod stock;

pub use stock::{
    ApplyMovement, MovementKind, StockCommand, StockEvent, StockLevel, StockLevelId, StockMoved,
};

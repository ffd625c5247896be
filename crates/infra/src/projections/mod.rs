//! Read-model projections over published event envelopes.
//!
//! Projections consume the JSON envelopes published after each append and
//! maintain disposable read models. Delivery is at-least-once: each
//! projection keeps a per-stream cursor and ignores replays at or below it,
//! so applying the same envelope twice is a no-op.

pub mod count_plans;
pub mod orders;
pub mod stock_by_bin;

use thiserror::Error;

pub use count_plans::CountPlansProjection;
pub use orders::{OrderReadModel, OrdersProjection};
pub use stock_by_bin::{StockByBinProjection, StockLevelReadModel};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

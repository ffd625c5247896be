//! Domain error model.
//!
//! The fulfillment error taxonomy groups into four caller-facing classes:
//! conflicts (recoverable by re-fetch and retry), validation failures
//! (rejected before any mutation), capacity failures, and resource limits.
//! Variants carry enough context (ids, current vs attempted values) for the
//! caller to render a precise message; nothing here is swallowed or retried
//! internally.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Infrastructure
/// concerns (storage, publication) belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    // --- Conflicts: recoverable by re-fetch and retry, never fatal ---
    /// The order is already owned by another worker for the requested role.
    #[error("order {order_id} already claimed by {owner}")]
    AlreadyClaimed { order_id: String, owner: String },

    /// The line item is already at its required quantity.
    #[error("line item {line_item_id} already complete ({required} of {required})")]
    AlreadyComplete { line_item_id: String, required: u32 },

    /// Undo would take the tracked quantity below zero.
    #[error("nothing to undo on line item {line_item_id} (current {current}, requested {requested})")]
    NothingToUndo {
        line_item_id: String,
        current: u32,
        requested: u32,
    },

    /// The caller's assumed prior value no longer matches current state.
    /// Retryable: re-fetch and re-issue the command.
    #[error("state changed: expected quantity {expected}, found {actual}")]
    StateChanged { expected: u32, actual: u32 },

    /// A generic conflict (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    // --- Validation: rejected before any mutation ---
    /// An audited action was attempted without the mandatory reason.
    #[error("a non-empty reason is required for {action}")]
    ReasonRequired { action: &'static str },

    /// A quantity was zero, negative, or would overshoot its bound.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Reconciliation attempted while unresolved variances remain.
    #[error("plan {plan_id} has {pending} unresolved variance(s)")]
    UnresolvedVariances { plan_id: String, pending: usize },

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    // --- Capacity: rejected unless an explicit override is supplied ---
    /// A movement would drive available stock below zero.
    #[error("insufficient stock for {sku} at {bin_location}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        bin_location: String,
        available: i64,
        requested: i64,
    },

    // --- Resource limits ---
    /// The worker already holds the maximum number of active orders.
    #[error("worker {worker_id} already has {active} active orders (limit {limit})")]
    TooManyActiveOrders {
        worker_id: String,
        active: usize,
        limit: usize,
    },

    // --- General ---
    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Whether re-fetching current state and retrying can succeed.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(
            self,
            Self::StateChanged { .. } | Self::Conflict(_)
        )
    }
}

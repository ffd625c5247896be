//! `binflow-orders` — the fulfillment order aggregate.
//!
//! One aggregate carries the three tightly-coupled concerns of an order's
//! physical life: the status state machine, exclusive worker claims
//! (compare-and-set on the owning field), and per-line-item scan
//! verification with audited undo.

pub mod line_item;
pub mod order;

pub use line_item::{LineItemId, LineItemStatus, NewLineItem, OrderLineItem};
pub use order::{
    Cancel, Claim, ConfirmPacked, ConfirmPicked, CreateOrder, ItemSkipped, ItemUnskipped,
    ItemVerified, Order, OrderCancelled, OrderClaimed, OrderCommand, OrderCreated, OrderEvent,
    OrderId, OrderPacked, OrderPicked, OrderShipped, OrderStatus, OrderUnclaimed, Priority, Ship,
    Shipment, Skip, UndoVerification, Unclaim, Unskip, VerificationPhase, VerificationUndone,
    Verify, WorkerRole,
};

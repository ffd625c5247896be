//! `binflow-counts` — cycle count plans and variance reconciliation.
//!
//! A plan walks SCHEDULED → IN_PROGRESS → COMPLETED → RECONCILED (CANCELLED
//! from any non-terminal state). Count entries capture counted-vs-system
//! variance; reconciliation is gated until every non-zero variance is
//! approved, rejected, or auto-adjusted. Approved and auto-adjusted deltas
//! flow into the inventory ledger outside this crate.

pub mod plan;

pub use plan::{
    CancelPlan, CompletePlan, CountEntry, CountScope, CreatePlan, CycleCountPlan, EntryId,
    EntryRecorded, PlanCancelled, PlanCommand, PlanCompleted, PlanCreated, PlanEvent, PlanId,
    PlanReconciled, PlanStarted, PlanStatus, RecordEntry, Reconcile, ResolveVariance,
    StartPlan, VarianceResolution, VarianceResolved, VarianceStatus,
};

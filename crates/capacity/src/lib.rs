//! `binflow-capacity` — bin-location capacity rules, evaluation and alerts.
//!
//! Rules are a small prioritized ruleset resolved per evaluation; the
//! evaluator's snapshots and alerts live behind a single lock so per-bin
//! recomputation is serialized. Evaluation itself is a pure function of
//! (ruleset, bin profile, bin contents) and therefore idempotent.

pub mod evaluator;
pub mod rule;

pub use evaluator::{
    BinProfile, CapacityAlert, CapacityEvaluator, LocationCapacitySnapshot, SkuSpec,
};
pub use rule::{AlertId, CapacityRule, CapacityStatus, CapacityType, RuleId, RuleScope};

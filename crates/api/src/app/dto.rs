//! Request DTOs and read-model-to-JSON mapping.
//!
//! SKUs and bin locations arrive as plain strings and are validated through
//! the domain constructors, so malformed values fail as 400s before any
//! command is built.

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use binflow_capacity::{CapacityType, RuleScope};
use binflow_core::WorkerId;
use binflow_counts::{CycleCountPlan, VarianceResolution};
use binflow_infra::projections::{OrderReadModel, StockLevelReadModel};
use binflow_ledger::MovementKind;
use binflow_orders::{LineItemId, OrderLineItem, Priority, WorkerRole};

// --- Orders ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct NewLineItemRequest {
    pub sku: String,
    pub bin_location: String,
    pub required_quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub priority: Priority,
    pub items: Vec<NewLineItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: WorkerId,
    pub role: WorkerRole,
}

#[derive(Debug, Deserialize)]
pub struct UnclaimRequest {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    /// Scanned quantity; one scan by default.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct UndoVerificationRequest {
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub reason: String,
    /// Caller's assumed current quantity; mismatch is a 409 state_changed.
    pub expected: Option<u32>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct SkipRequest {
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct UnskipRequest {
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPickedRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPackedRequest {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub accept_skipped: bool,
}

#[derive(Debug, Deserialize)]
pub struct ShipRequest {
    pub worker_id: WorkerId,
    pub carrier: String,
    pub weight_grams: u64,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub reason: String,
}

// --- Stock -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MovementRequest {
    pub sku: String,
    pub bin_location: String,
    pub delta_on_hand: i64,
    #[serde(default)]
    pub delta_reserved: i64,
    pub kind: MovementKind,
    #[serde(default)]
    pub reason: String,
    pub worker_id: WorkerId,
    #[serde(default)]
    pub override_availability: bool,
}

// --- Capacity --------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CapacityRuleRequest {
    #[serde(flatten)]
    pub scope: RuleScope,
    pub capacity_type: CapacityType,
    pub maximum_capacity: f64,
    #[serde(default = "default_warning_pct")]
    pub warning_threshold_pct: f64,
    #[serde(default)]
    pub allow_overfill: bool,
    #[serde(default = "default_overfill_pct")]
    pub overfill_threshold_pct: f64,
    #[serde(default)]
    pub priority: i32,
}

fn default_warning_pct() -> f64 {
    80.0
}

fn default_overfill_pct() -> f64 {
    10.0
}

#[derive(Debug, Deserialize)]
pub struct BinProfileRequest {
    pub location: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub location_type: String,
}

#[derive(Debug, Deserialize)]
pub struct SkuSpecRequest {
    pub sku: String,
    pub unit_weight_kg: f64,
    pub unit_volume_l: f64,
}

// --- Cycle counts ----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub bin_location: Option<String>,
    pub sku: Option<String>,
    pub assigned_to: Option<WorkerId>,
}

#[derive(Debug, Deserialize)]
pub struct StartPlanRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
pub struct CountEntryRequest {
    pub sku: String,
    pub bin_location: String,
    pub system_quantity: i64,
    pub counted_quantity: i64,
    pub worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
pub struct CompletePlanRequest {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub auto_adjust_tolerance: i64,
}

#[derive(Debug, Deserialize)]
pub struct VarianceResolutionRequest {
    pub status: VarianceResolution,
    pub worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
pub struct CancelPlanRequest {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub reason: String,
}

// --- Read-model mapping ----------------------------------------------------

pub fn order_to_json(rm: &OrderReadModel) -> JsonValue {
    let order = &rm.order;
    json!({
        "id": order.id_typed().0.to_string(),
        "status": order.status(),
        "priority": order.priority(),
        "picker_id": order.picker_id(),
        "packer_id": order.packer_id(),
        "pick_complete": order.pick_complete(),
        "pack_complete": order.pack_complete(),
        "shipment": order.shipment(),
        "items": order.items().iter().map(line_item_to_json).collect::<Vec<_>>(),
        "updated_at": rm.updated_at,
    })
}

pub fn line_item_to_json(item: &OrderLineItem) -> JsonValue {
    json!({
        "id": item.id,
        "sku": item.sku,
        "bin_location": item.bin_location,
        "required_quantity": item.required_quantity,
        "picked_quantity": item.picked_quantity,
        "verified_quantity": item.verified_quantity,
        "status": item.status,
        "skip_reason": item.skip_reason,
    })
}

pub fn stock_level_to_json(rm: &StockLevelReadModel) -> JsonValue {
    json!({
        "stock_level_id": rm.stock_level_id.0.to_string(),
        "sku": rm.sku,
        "bin_location": rm.bin_location,
        "quantity_on_hand": rm.quantity_on_hand,
        "reserved": rm.reserved,
        "available": rm.available(),
        "updated_at": rm.updated_at,
    })
}

pub fn plan_to_json(plan: &CycleCountPlan) -> JsonValue {
    json!({
        "id": plan.id_typed().0.to_string(),
        "status": plan.status(),
        "scope": plan.scope(),
        "assigned_to": plan.assigned_to(),
        "unresolved_variances": plan.unresolved_variances(),
        "entries": plan.entries().iter().map(|e| json!({
            "id": e.id,
            "sku": e.sku,
            "bin_location": e.bin_location,
            "system_quantity": e.system_quantity,
            "counted_quantity": e.counted_quantity,
            "variance": e.variance(),
            "variance_status": e.variance_status,
            "counted_by": e.counted_by,
            "recorded_at": e.recorded_at,
        })).collect::<Vec<_>>(),
    })
}

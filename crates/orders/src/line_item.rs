use serde::{Deserialize, Serialize};
use uuid::Uuid;

use binflow_core::{BinLocation, Sku};

/// Line item identifier (unique within and across orders).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineItemId(pub Uuid);

impl LineItemId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for LineItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for LineItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Pick progress of one line item.
///
/// `Skipped` and `FullyDone` are mutually exclusive; both are resettable via
/// explicit revert (unskip, undo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemStatus {
    Pending,
    Partial,
    FullyDone,
    Skipped,
}

/// Line item specification at order intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub sku: Sku,
    pub bin_location: BinLocation,
    pub required_quantity: u32,
}

/// One line of an order: what to pick, from where, and how far along it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub id: LineItemId,
    pub sku: Sku,
    pub bin_location: BinLocation,
    pub required_quantity: u32,
    pub picked_quantity: u32,
    pub verified_quantity: u32,
    pub status: LineItemStatus,
    pub skip_reason: Option<String>,
}

impl OrderLineItem {
    pub fn new(id: LineItemId, spec: NewLineItem) -> Self {
        Self {
            id,
            sku: spec.sku,
            bin_location: spec.bin_location,
            required_quantity: spec.required_quantity,
            picked_quantity: 0,
            verified_quantity: 0,
            status: LineItemStatus::Pending,
            skip_reason: None,
        }
    }

    /// Status implied by the current pick quantity (skip state excluded).
    pub fn status_for_quantity(&self, picked: u32) -> LineItemStatus {
        if picked == 0 {
            LineItemStatus::Pending
        } else if picked < self.required_quantity {
            LineItemStatus::Partial
        } else {
            LineItemStatus::FullyDone
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == LineItemStatus::Skipped
    }

    /// Eligible to count toward PICKING → PICKED.
    pub fn pick_resolved(&self) -> bool {
        matches!(self.status, LineItemStatus::FullyDone | LineItemStatus::Skipped)
    }

    /// Fully verified at pack time.
    pub fn pack_resolved(&self) -> bool {
        self.verified_quantity == self.required_quantity
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use binflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, WorkerId};
use binflow_events::Event;

use crate::line_item::{LineItemId, LineItemStatus, NewLineItem, OrderLineItem};

/// Fulfillment order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order lifecycle. CANCELLED is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Picking,
    Picked,
    Packing,
    Packed,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Cancelled)
    }
}

/// Role a worker claims an order under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Picker,
    Packer,
}

/// The phase a verification scan applies to. Determines which quantity
/// counter the event moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPhase {
    Picking,
    Packing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Minimal shipment contract from the external shipping collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub carrier: String,
    pub weight_grams: u64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    status: OrderStatus,
    priority: Priority,
    picker_id: Option<WorkerId>,
    packer_id: Option<WorkerId>,
    items: Vec<OrderLineItem>,
    shipment: Option<Shipment>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            status: OrderStatus::Pending,
            priority: Priority::Normal,
            picker_id: None,
            packer_id: None,
            items: Vec::new(),
            shipment: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn picker_id(&self) -> Option<WorkerId> {
        self.picker_id
    }

    pub fn packer_id(&self) -> Option<WorkerId> {
        self.packer_id
    }

    pub fn items(&self) -> &[OrderLineItem] {
        &self.items
    }

    pub fn shipment(&self) -> Option<&Shipment> {
        self.shipment.as_ref()
    }

    /// Eligibility check only; PICKING → PICKED stays an explicit command.
    pub fn pick_complete(&self) -> bool {
        self.status == OrderStatus::Picking && self.items.iter().all(|i| i.pick_resolved())
    }

    /// Eligibility check only; PACKING → PACKED stays an explicit command.
    /// Skipped items require the explicit override at confirm time.
    pub fn pack_complete(&self) -> bool {
        self.status == OrderStatus::Packing
            && self.items.iter().all(|i| i.pack_resolved() || i.is_skipped())
    }

    fn item(&self, id: LineItemId) -> Result<&OrderLineItem, DomainError> {
        self.items
            .iter()
            .find(|i| i.id == id)
            .ok_or(DomainError::NotFound)
    }

    fn item_mut(&mut self, id: LineItemId) -> Option<&mut OrderLineItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Command: CreateOrder (upstream intake hook).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub priority: Priority,
    pub items: Vec<NewLineItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Claim — atomic compare-and-set on the role's owning field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub order_id: OrderId,
    pub worker_id: WorkerId,
    pub role: WorkerRole,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Unclaim — release ownership, keep all scan progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unclaim {
    pub order_id: OrderId,
    pub worker_id: WorkerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Verify — record scanned quantity on a line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verify {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UndoVerification — audited reversal of scan progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoVerification {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    pub quantity: u32,
    pub reason: String,
    /// Caller's assumed current quantity (optimistic check); mismatch is a
    /// retryable `StateChanged`.
    pub expected: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Skip — freeze a line item with a mandatory reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skip {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Unskip — explicit revert back into the pick flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unskip {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPicked (PICKING → PICKED).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPicked {
    pub order_id: OrderId,
    pub worker_id: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPacked (PACKING → PACKED).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPacked {
    pub order_id: OrderId,
    pub worker_id: WorkerId,
    /// Required authorization when skipped items remain at pack time.
    pub accept_skipped: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Ship (PACKED → SHIPPED, given a shipment record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ship {
    pub order_id: OrderId,
    pub actor: WorkerId,
    pub carrier: String,
    pub weight_grams: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel (terminal; audit history preserved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub order_id: OrderId,
    pub actor: WorkerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    CreateOrder(CreateOrder),
    Claim(Claim),
    Unclaim(Unclaim),
    Verify(Verify),
    UndoVerification(UndoVerification),
    Skip(Skip),
    Unskip(Unskip),
    ConfirmPicked(ConfirmPicked),
    ConfirmPacked(ConfirmPacked),
    Ship(Ship),
    Cancel(Cancel),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub priority: Priority,
    pub items: Vec<OrderLineItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderClaimed {
    pub order_id: OrderId,
    pub worker_id: WorkerId,
    pub role: WorkerRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUnclaimed {
    pub order_id: OrderId,
    pub worker_id: WorkerId,
    pub role: WorkerRole,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVerified {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    pub phase: VerificationPhase,
    /// Applied delta (clamped so the counter never exceeds required).
    pub quantity: u32,
    pub new_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationUndone {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    pub phase: VerificationPhase,
    pub quantity: u32,
    pub new_quantity: u32,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSkipped {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUnskipped {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub worker_id: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPicked {
    pub order_id: OrderId,
    pub worker_id: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPacked {
    pub order_id: OrderId,
    pub worker_id: WorkerId,
    pub skipped_accepted: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: OrderId,
    pub actor: WorkerId,
    pub carrier: String,
    pub weight_grams: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub actor: WorkerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    OrderClaimed(OrderClaimed),
    OrderUnclaimed(OrderUnclaimed),
    ItemVerified(ItemVerified),
    VerificationUndone(VerificationUndone),
    ItemSkipped(ItemSkipped),
    ItemUnskipped(ItemUnskipped),
    OrderPicked(OrderPicked),
    OrderPacked(OrderPacked),
    OrderShipped(OrderShipped),
    OrderCancelled(OrderCancelled),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "orders.order.created",
            OrderEvent::OrderClaimed(_) => "orders.order.claimed",
            OrderEvent::OrderUnclaimed(_) => "orders.order.unclaimed",
            OrderEvent::ItemVerified(_) => "orders.item.verified",
            OrderEvent::VerificationUndone(_) => "orders.item.verification_undone",
            OrderEvent::ItemSkipped(_) => "orders.item.skipped",
            OrderEvent::ItemUnskipped(_) => "orders.item.unskipped",
            OrderEvent::OrderPicked(_) => "orders.order.picked",
            OrderEvent::OrderPacked(_) => "orders.order.packed",
            OrderEvent::OrderShipped(_) => "orders.order.shipped",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::OrderClaimed(e) => e.occurred_at,
            OrderEvent::OrderUnclaimed(e) => e.occurred_at,
            OrderEvent::ItemVerified(e) => e.occurred_at,
            OrderEvent::VerificationUndone(e) => e.occurred_at,
            OrderEvent::ItemSkipped(e) => e.occurred_at,
            OrderEvent::ItemUnskipped(e) => e.occurred_at,
            OrderEvent::OrderPicked(e) => e.occurred_at,
            OrderEvent::OrderPacked(e) => e.occurred_at,
            OrderEvent::OrderShipped(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate behaviour
// ---------------------------------------------------------------------------

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.status = OrderStatus::Pending;
                self.priority = e.priority;
                self.items = e.items.clone();
                self.picker_id = None;
                self.packer_id = None;
                self.shipment = None;
                self.created = true;
            }
            OrderEvent::OrderClaimed(e) => match e.role {
                WorkerRole::Picker => {
                    self.status = OrderStatus::Picking;
                    self.picker_id = Some(e.worker_id);
                }
                WorkerRole::Packer => {
                    self.status = OrderStatus::Packing;
                    self.packer_id = Some(e.worker_id);
                }
            },
            OrderEvent::OrderUnclaimed(e) => match e.role {
                WorkerRole::Picker => {
                    self.status = OrderStatus::Pending;
                    self.picker_id = None;
                }
                WorkerRole::Packer => {
                    self.status = OrderStatus::Picked;
                    self.packer_id = None;
                }
            },
            OrderEvent::ItemVerified(e) => {
                let phase = e.phase;
                let new_quantity = e.new_quantity;
                if let Some(item) = self.item_mut(e.line_item_id) {
                    match phase {
                        VerificationPhase::Picking => {
                            item.picked_quantity = new_quantity;
                            item.status = item.status_for_quantity(new_quantity);
                        }
                        VerificationPhase::Packing => {
                            item.verified_quantity = new_quantity;
                        }
                    }
                }
            }
            OrderEvent::VerificationUndone(e) => {
                let phase = e.phase;
                let new_quantity = e.new_quantity;
                if let Some(item) = self.item_mut(e.line_item_id) {
                    match phase {
                        VerificationPhase::Picking => {
                            item.picked_quantity = new_quantity;
                            item.status = item.status_for_quantity(new_quantity);
                        }
                        VerificationPhase::Packing => {
                            item.verified_quantity = new_quantity;
                        }
                    }
                }
            }
            OrderEvent::ItemSkipped(e) => {
                let reason = e.reason.clone();
                if let Some(item) = self.item_mut(e.line_item_id) {
                    item.status = LineItemStatus::Skipped;
                    item.skip_reason = Some(reason);
                }
            }
            OrderEvent::ItemUnskipped(e) => {
                if let Some(item) = self.item_mut(e.line_item_id) {
                    item.status = item.status_for_quantity(item.picked_quantity);
                    item.skip_reason = None;
                }
            }
            OrderEvent::OrderPicked(_) => {
                self.status = OrderStatus::Picked;
                // Invariant: picker_id set implies status == PICKING.
                self.picker_id = None;
            }
            OrderEvent::OrderPacked(_) => {
                self.status = OrderStatus::Packed;
            }
            OrderEvent::OrderShipped(e) => {
                self.status = OrderStatus::Shipped;
                self.shipment = Some(Shipment {
                    carrier: e.carrier.clone(),
                    weight_grams: e.weight_grams,
                });
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Cancelled;
                self.picker_id = None;
                self.packer_id = None;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            OrderCommand::Claim(cmd) => self.handle_claim(cmd),
            OrderCommand::Unclaim(cmd) => self.handle_unclaim(cmd),
            OrderCommand::Verify(cmd) => self.handle_verify(cmd),
            OrderCommand::UndoVerification(cmd) => self.handle_undo(cmd),
            OrderCommand::Skip(cmd) => self.handle_skip(cmd),
            OrderCommand::Unskip(cmd) => self.handle_unskip(cmd),
            OrderCommand::ConfirmPicked(cmd) => self.handle_confirm_picked(cmd),
            OrderCommand::ConfirmPacked(cmd) => self.handle_confirm_packed(cmd),
            OrderCommand::Ship(cmd) => self.handle_ship(cmd),
            OrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Order {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    /// The phase a scan applies to, and the worker who must issue it.
    fn scan_phase(&self) -> Result<(VerificationPhase, WorkerId), DomainError> {
        match self.status {
            OrderStatus::Picking => {
                let owner = self
                    .picker_id
                    .ok_or_else(|| DomainError::invariant("picking order has no picker"))?;
                Ok((VerificationPhase::Picking, owner))
            }
            OrderStatus::Packing => {
                let owner = self
                    .packer_id
                    .ok_or_else(|| DomainError::invariant("packing order has no packer"))?;
                Ok((VerificationPhase::Packing, owner))
            }
            other => Err(DomainError::invariant(format!(
                "order is not in a scannable state (status {other:?})"
            ))),
        }
    }

    fn ensure_owned_by(&self, worker_id: WorkerId) -> Result<VerificationPhase, DomainError> {
        let (phase, owner) = self.scan_phase()?;
        if owner != worker_id {
            return Err(DomainError::invariant(format!(
                "order {} is owned by {owner}, not {worker_id}",
                self.id
            )));
        }
        Ok(phase)
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("order must have at least one line item"));
        }
        if cmd.items.iter().any(|i| i.required_quantity == 0) {
            return Err(DomainError::invalid_quantity(
                "required quantity must be positive",
            ));
        }

        let items = cmd
            .items
            .iter()
            .cloned()
            .map(|spec| OrderLineItem::new(LineItemId::new(), spec))
            .collect();

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            priority: cmd.priority,
            items,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Compare-and-set claim: exactly one winner per (order, role); the
    /// current owner re-claiming is an idempotent no-op.
    fn handle_claim(&self, cmd: &Claim) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        let already_claimed = |owner: Option<WorkerId>| DomainError::AlreadyClaimed {
            order_id: cmd.order_id.to_string(),
            owner: owner
                .map(|w| w.to_string())
                .unwrap_or_else(|| format!("unavailable in status {:?}", self.status)),
        };

        match cmd.role {
            WorkerRole::Picker => match self.status {
                OrderStatus::Pending => Ok(vec![OrderEvent::OrderClaimed(OrderClaimed {
                    order_id: cmd.order_id,
                    worker_id: cmd.worker_id,
                    role: WorkerRole::Picker,
                    occurred_at: cmd.occurred_at,
                })]),
                OrderStatus::Picking if self.picker_id == Some(cmd.worker_id) => Ok(vec![]),
                OrderStatus::Picking => Err(already_claimed(self.picker_id)),
                _ => Err(already_claimed(None)),
            },
            WorkerRole::Packer => match self.status {
                OrderStatus::Picked => Ok(vec![OrderEvent::OrderClaimed(OrderClaimed {
                    order_id: cmd.order_id,
                    worker_id: cmd.worker_id,
                    role: WorkerRole::Packer,
                    occurred_at: cmd.occurred_at,
                })]),
                OrderStatus::Packing if self.packer_id == Some(cmd.worker_id) => Ok(vec![]),
                OrderStatus::Packing => Err(already_claimed(self.packer_id)),
                _ => Err(already_claimed(None)),
            },
        }
    }

    fn handle_unclaim(&self, cmd: &Unclaim) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::ReasonRequired { action: "unclaim" });
        }

        let role = match self.status {
            OrderStatus::Picking if self.picker_id == Some(cmd.worker_id) => WorkerRole::Picker,
            OrderStatus::Packing if self.packer_id == Some(cmd.worker_id) => WorkerRole::Packer,
            OrderStatus::Picking | OrderStatus::Packing => {
                return Err(DomainError::invariant(format!(
                    "worker {} does not own order {}",
                    cmd.worker_id, self.id
                )));
            }
            other => {
                return Err(DomainError::invariant(format!(
                    "cannot unclaim an order in status {other:?}"
                )));
            }
        };

        Ok(vec![OrderEvent::OrderUnclaimed(OrderUnclaimed {
            order_id: cmd.order_id,
            worker_id: cmd.worker_id,
            role,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_verify(&self, cmd: &Verify) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        let phase = self.ensure_owned_by(cmd.worker_id)?;
        let item = self.item(cmd.line_item_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::invalid_quantity("verify quantity must be positive"));
        }
        if item.is_skipped() {
            return Err(DomainError::invariant(format!(
                "line item {} is skipped; unskip before verifying",
                item.id
            )));
        }

        let current = match phase {
            VerificationPhase::Picking => item.picked_quantity,
            VerificationPhase::Packing => item.verified_quantity,
        };

        if current >= item.required_quantity {
            return Err(DomainError::AlreadyComplete {
                line_item_id: item.id.to_string(),
                required: item.required_quantity,
            });
        }

        // Clamp: the counter never exceeds required.
        let new_quantity = (current + cmd.quantity).min(item.required_quantity);

        Ok(vec![OrderEvent::ItemVerified(ItemVerified {
            order_id: cmd.order_id,
            line_item_id: cmd.line_item_id,
            worker_id: cmd.worker_id,
            phase,
            quantity: new_quantity - current,
            new_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_undo(&self, cmd: &UndoVerification) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        let phase = self.ensure_owned_by(cmd.worker_id)?;
        let item = self.item(cmd.line_item_id)?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::ReasonRequired {
                action: "undo verification",
            });
        }
        if cmd.quantity == 0 {
            return Err(DomainError::invalid_quantity("undo quantity must be positive"));
        }
        if item.is_skipped() {
            return Err(DomainError::invariant(format!(
                "line item {} is skipped; unskip before undoing",
                item.id
            )));
        }

        let current = match phase {
            VerificationPhase::Picking => item.picked_quantity,
            VerificationPhase::Packing => item.verified_quantity,
        };

        // Optimistic check against the value re-read at dispatch time: protects
        // two concurrent undos from double-decrementing.
        if let Some(expected) = cmd.expected {
            if expected != current {
                return Err(DomainError::StateChanged {
                    expected,
                    actual: current,
                });
            }
        }

        if current < cmd.quantity {
            return Err(DomainError::NothingToUndo {
                line_item_id: item.id.to_string(),
                current,
                requested: cmd.quantity,
            });
        }

        Ok(vec![OrderEvent::VerificationUndone(VerificationUndone {
            order_id: cmd.order_id,
            line_item_id: cmd.line_item_id,
            worker_id: cmd.worker_id,
            phase,
            quantity: cmd.quantity,
            new_quantity: current - cmd.quantity,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_skip(&self, cmd: &Skip) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_owned_by(cmd.worker_id)?;
        let item = self.item(cmd.line_item_id)?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::ReasonRequired { action: "skip" });
        }
        if item.is_skipped() {
            return Err(DomainError::conflict(format!("line item {} already skipped", item.id)));
        }
        // SKIPPED and FULLY_DONE are mutually exclusive.
        if item.status == LineItemStatus::FullyDone {
            return Err(DomainError::invariant(format!(
                "line item {} is fully picked and cannot be skipped",
                item.id
            )));
        }

        Ok(vec![OrderEvent::ItemSkipped(ItemSkipped {
            order_id: cmd.order_id,
            line_item_id: cmd.line_item_id,
            worker_id: cmd.worker_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_unskip(&self, cmd: &Unskip) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_owned_by(cmd.worker_id)?;
        let item = self.item(cmd.line_item_id)?;

        if !item.is_skipped() {
            return Err(DomainError::invariant(format!(
                "line item {} is not skipped",
                item.id
            )));
        }

        Ok(vec![OrderEvent::ItemUnskipped(ItemUnskipped {
            order_id: cmd.order_id,
            line_item_id: cmd.line_item_id,
            worker_id: cmd.worker_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_picked(&self, cmd: &ConfirmPicked) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::Picking {
            return Err(DomainError::invariant(format!(
                "only picking orders can be confirmed picked (status {:?})",
                self.status
            )));
        }
        if self.picker_id != Some(cmd.worker_id) {
            return Err(DomainError::invariant(format!(
                "worker {} does not own order {}",
                cmd.worker_id, self.id
            )));
        }
        if !self.pick_complete() {
            let open = self.items.iter().filter(|i| !i.pick_resolved()).count();
            return Err(DomainError::invariant(format!(
                "{open} line item(s) are neither fully picked nor skipped"
            )));
        }

        Ok(vec![OrderEvent::OrderPicked(OrderPicked {
            order_id: cmd.order_id,
            worker_id: cmd.worker_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_packed(&self, cmd: &ConfirmPacked) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::Packing {
            return Err(DomainError::invariant(format!(
                "only packing orders can be confirmed packed (status {:?})",
                self.status
            )));
        }
        if self.packer_id != Some(cmd.worker_id) {
            return Err(DomainError::invariant(format!(
                "worker {} does not own order {}",
                cmd.worker_id, self.id
            )));
        }

        let unresolved = self
            .items
            .iter()
            .filter(|i| !i.pack_resolved() && !i.is_skipped())
            .count();
        if unresolved > 0 {
            return Err(DomainError::invariant(format!(
                "{unresolved} line item(s) not fully verified"
            )));
        }

        // Skipped items never complete silently: they need the explicit override.
        let skipped = self.items.iter().filter(|i| i.is_skipped()).count();
        if skipped > 0 && !cmd.accept_skipped {
            return Err(DomainError::invariant(format!(
                "{skipped} skipped line item(s) require explicit acceptance"
            )));
        }

        Ok(vec![OrderEvent::OrderPacked(OrderPacked {
            order_id: cmd.order_id,
            worker_id: cmd.worker_id,
            skipped_accepted: skipped > 0,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &Ship) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::Packed {
            return Err(DomainError::invariant(format!(
                "only packed orders can be shipped (status {:?})",
                self.status
            )));
        }
        if cmd.carrier.trim().is_empty() {
            return Err(DomainError::validation("shipment carrier cannot be empty"));
        }
        if cmd.weight_grams == 0 {
            return Err(DomainError::invalid_quantity("shipment weight must be positive"));
        }

        Ok(vec![OrderEvent::OrderShipped(OrderShipped {
            order_id: cmd.order_id,
            actor: cmd.actor,
            carrier: cmd.carrier.clone(),
            weight_grams: cmd.weight_grams,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot cancel an order in terminal status {:?}",
                self.status
            )));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::ReasonRequired { action: "cancel" });
        }

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            actor: cmd.actor,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

//! Infrastructure wiring plus the workflow logic that spans more than one
//! aggregate: the picker claim cap, picking-scan stock movements,
//! post-movement capacity evaluation, and writing resolved count variances
//! back to the ledger.

use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;

use binflow_capacity::{CapacityEvaluator, LocationCapacitySnapshot};
use binflow_core::{AggregateId, BinLocation, DomainError, Sku};
use binflow_counts::{CycleCountPlan, PlanCommand, PlanEvent, PlanId, VarianceStatus};
use binflow_events::{EventBus, EventEnvelope, InMemoryEventBus};
use binflow_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{InMemoryEventStore, StoredEvent},
    projections::{
        CountPlansProjection, OrderReadModel, OrdersProjection, StockByBinProjection,
        StockLevelReadModel,
    },
    read_model::InMemoryStateStore,
};
use binflow_ledger::{ApplyMovement, MovementKind, StockCommand, StockLevel, StockLevelId};
use binflow_orders::{
    Claim, Order, OrderCommand, OrderEvent, OrderId, VerificationPhase, WorkerRole,
};

/// At most this many simultaneously PICKING orders per picker. Packing has
/// no cap.
pub const MAX_ACTIVE_PICKING: usize = 5;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;

type OrdersRm = Arc<OrdersProjection<Arc<InMemoryStateStore<AggregateId, OrderReadModel>>>>;
type StockRm = Arc<StockByBinProjection<Arc<InMemoryStateStore<AggregateId, StockLevelReadModel>>>>;
type PlansRm = Arc<CountPlansProjection<Arc<InMemoryStateStore<AggregateId, CycleCountPlan>>>>;

pub struct AppServices {
    dispatcher: Dispatcher,
    orders_projection: OrdersRm,
    stock_projection: StockRm,
    plans_projection: PlansRm,
    evaluator: Arc<CapacityEvaluator>,
    /// Serializes cap check + claim dispatch so two concurrent claims by
    /// the same picker cannot both pass the count.
    claim_gate: Mutex<()>,
}

pub fn build_services() -> AppServices {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    let orders_projection: OrdersRm =
        Arc::new(OrdersProjection::new(Arc::new(InMemoryStateStore::new())));
    let stock_projection: StockRm =
        Arc::new(StockByBinProjection::new(Arc::new(InMemoryStateStore::new())));
    let plans_projection: PlansRm =
        Arc::new(CountPlansProjection::new(Arc::new(InMemoryStateStore::new())));

    // Background subscriber: bus -> projections. The command paths also
    // apply their own committed events synchronously; cursor idempotency
    // makes this redelivery a no-op for those.
    {
        let sub = bus.subscribe();
        let orders_projection = orders_projection.clone();
        let stock_projection = stock_projection.clone();
        let plans_projection = plans_projection.clone();
        tokio::task::spawn_blocking(move || loop {
            match sub.recv() {
                Ok(env) => {
                    let applied = match env.aggregate_type() {
                        "orders.order" => {
                            orders_projection.apply_envelope(&env).map_err(|e| e.to_string())
                        }
                        "ledger.stock" => {
                            stock_projection.apply_envelope(&env).map_err(|e| e.to_string())
                        }
                        "counts.plan" => {
                            plans_projection.apply_envelope(&env).map_err(|e| e.to_string())
                        }
                        _ => Ok(()),
                    };
                    if let Err(e) = applied {
                        tracing::warn!("projection apply failed: {e}");
                    }
                }
                Err(_) => {
                    tracing::info!("event bus closed; stopping projection subscriber");
                    break;
                }
            }
        });
    }

    AppServices {
        dispatcher: CommandDispatcher::new(store, bus),
        orders_projection,
        stock_projection,
        plans_projection,
        evaluator: Arc::new(CapacityEvaluator::new()),
        claim_gate: Mutex::new(()),
    }
}

impl AppServices {
    pub fn evaluator(&self) -> &CapacityEvaluator {
        &self.evaluator
    }

    // --- Orders ------------------------------------------------------------

    /// Dispatch an order command, bring the orders read model up to date,
    /// and write any picking-scan stock movements through the ledger before
    /// responding.
    pub fn dispatch_order(
        &self,
        aggregate_id: AggregateId,
        command: OrderCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let committed = self.dispatcher.dispatch::<Order>(
            aggregate_id,
            "orders.order",
            command,
            |id| Order::empty(OrderId::new(id)),
        )?;
        for event in &committed {
            if let Err(e) = self.orders_projection.apply_envelope(&event.to_envelope()) {
                tracing::warn!("orders projection apply failed: {e}");
            }
        }
        self.apply_scan_ledger_effects(aggregate_id, &committed);
        Ok(committed)
    }

    /// Picking scans move physical stock: each verify takes the scanned
    /// quantity out of the line item's bin, each undo puts it back. The scan
    /// is physical truth, so the availability check is overridden; ledger
    /// drift surfaces at the next cycle count. Packing scans re-check goods
    /// already off the shelf and move nothing.
    fn apply_scan_ledger_effects(&self, aggregate_id: AggregateId, committed: &[StoredEvent]) {
        let order = match self.order(OrderId::new(aggregate_id)) {
            Some(rm) => rm.order,
            None => return,
        };

        for stored in committed {
            let event: OrderEvent = match serde_json::from_value(stored.payload.clone()) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("undecodable order event payload: {e}");
                    continue;
                }
            };
            let (line_item_id, kind, delta, reason, actor) = match event {
                OrderEvent::ItemVerified(ev) if ev.phase == VerificationPhase::Picking => (
                    ev.line_item_id,
                    MovementKind::Pick,
                    -i64::from(ev.quantity),
                    format!("pick scan for order {}", order.id_typed()),
                    ev.worker_id,
                ),
                OrderEvent::VerificationUndone(ev) if ev.phase == VerificationPhase::Picking => (
                    ev.line_item_id,
                    MovementKind::PickUndo,
                    i64::from(ev.quantity),
                    format!("pick undo for order {}: {}", order.id_typed(), ev.reason),
                    ev.worker_id,
                ),
                _ => continue,
            };
            let Some(item) = order.items().iter().find(|i| i.id == line_item_id) else {
                continue;
            };
            let movement = ApplyMovement {
                sku: item.sku.clone(),
                bin_location: item.bin_location.clone(),
                delta_on_hand: delta,
                delta_reserved: 0,
                kind,
                reason,
                actor,
                override_availability: true,
                occurred_at: stored.occurred_at,
            };
            // The order event is already committed; a failed side effect is
            // logged, not bounced back to the scanner.
            if let Err(e) = self.apply_movement(movement) {
                tracing::warn!("ledger movement for scan failed: {e}");
            }
        }
    }

    /// Claim with the picker cap. The store-level race between two workers
    /// is re-dispatched once so the loser gets the deterministic
    /// `AlreadyClaimed` answer instead of a bare concurrency conflict.
    pub fn claim_order(
        &self,
        aggregate_id: AggregateId,
        claim: Claim,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let _gate = self.claim_gate.lock().expect("claim gate poisoned");

        if claim.role == WorkerRole::Picker {
            let active = self.orders_projection.active_picking(claim.worker_id);
            if active >= MAX_ACTIVE_PICKING {
                return Err(DispatchError::Domain(DomainError::TooManyActiveOrders {
                    worker_id: claim.worker_id.to_string(),
                    active,
                    limit: MAX_ACTIVE_PICKING,
                }));
            }
        }

        let command = OrderCommand::Claim(claim);
        match self.dispatch_order(aggregate_id, command.clone()) {
            Err(e) if e.is_concurrency() => self.dispatch_order(aggregate_id, command),
            other => other,
        }
    }

    pub fn order(&self, order_id: OrderId) -> Option<OrderReadModel> {
        self.orders_projection.get(order_id)
    }

    pub fn orders(&self) -> Vec<OrderReadModel> {
        self.orders_projection.list()
    }

    // --- Stock ledger ------------------------------------------------------

    /// Apply a movement to its (sku, bin) stream, update the stock read
    /// model, and re-evaluate the affected bin's capacity before returning.
    pub fn apply_movement(
        &self,
        movement: ApplyMovement,
    ) -> Result<(Vec<StoredEvent>, Vec<LocationCapacitySnapshot>), DispatchError> {
        let stream_id = StockLevelId::for_location(&movement.sku, &movement.bin_location);
        let bin = movement.bin_location.clone();

        let committed = self.dispatcher.dispatch::<StockLevel>(
            stream_id.0,
            "ledger.stock",
            StockCommand::ApplyMovement(movement),
            |id| StockLevel::empty(StockLevelId::new(id)),
        )?;
        for event in &committed {
            if let Err(e) = self.stock_projection.apply_envelope(&event.to_envelope()) {
                tracing::warn!("stock projection apply failed: {e}");
            }
        }

        let contents = self.stock_projection.contents_of_bin(&bin);
        let snapshots = self.evaluator.evaluate_bin(&bin, &contents);
        Ok((committed, snapshots))
    }

    pub fn stock_level(&self, sku: &Sku, bin_location: &BinLocation) -> Option<StockLevelReadModel> {
        self.stock_projection.get(sku, bin_location)
    }

    pub fn stock_levels(&self, bin_location: Option<&BinLocation>) -> Vec<StockLevelReadModel> {
        match bin_location {
            Some(bin) => self
                .stock_projection
                .list()
                .into_iter()
                .filter(|rm| &rm.bin_location == bin)
                .collect(),
            None => self.stock_projection.list(),
        }
    }

    // --- Cycle counts ------------------------------------------------------

    /// Dispatch a plan command, bring the read model up to date, and write
    /// any resolved variances through the ledger before responding.
    pub fn dispatch_plan(
        &self,
        aggregate_id: AggregateId,
        command: PlanCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let committed = self.dispatcher.dispatch::<CycleCountPlan>(
            aggregate_id,
            "counts.plan",
            command,
            |id| CycleCountPlan::empty(PlanId(id)),
        )?;
        for event in &committed {
            if let Err(e) = self.plans_projection.apply_envelope(&event.to_envelope()) {
                tracing::warn!("count plans projection apply failed: {e}");
            }
        }
        self.apply_count_ledger_effects(aggregate_id, &committed);
        Ok(committed)
    }

    pub fn plan(&self, plan_id: PlanId) -> Option<CycleCountPlan> {
        self.plans_projection.get(plan_id)
    }

    pub fn plans(&self) -> Vec<CycleCountPlan> {
        self.plans_projection.list()
    }

    /// A variance writes its counted delta into the ledger the moment it is
    /// resolved in its favor: at `VarianceResolved(Approved)` and for each
    /// entry a `PlanCompleted` auto-adjusted. Rejection and reconcile move
    /// no stock; reconcile is only the checkpoint that the ledger already
    /// matches the count. A physical count is ground truth, so the
    /// availability check is overridden.
    fn apply_count_ledger_effects(&self, aggregate_id: AggregateId, committed: &[StoredEvent]) {
        let plan_id = PlanId::new(aggregate_id);
        let plan = match self.plan(plan_id) {
            Some(plan) => plan,
            None => return,
        };

        for stored in committed {
            let event: PlanEvent = match serde_json::from_value(stored.payload.clone()) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("undecodable plan event payload: {e}");
                    continue;
                }
            };
            let (entry_ids, actor, reason) = match event {
                PlanEvent::VarianceResolved(ev) if ev.status == VarianceStatus::Approved => (
                    vec![ev.entry_id],
                    ev.actor,
                    format!("cycle count {plan_id} variance approved"),
                ),
                PlanEvent::PlanCompleted(ev) if !ev.auto_adjusted.is_empty() => (
                    ev.auto_adjusted,
                    ev.actor,
                    format!("cycle count {plan_id} auto adjustment"),
                ),
                _ => continue,
            };
            for entry_id in entry_ids {
                let Ok(entry) = plan.entry(entry_id) else { continue };
                if entry.variance() == 0 {
                    continue;
                }
                let movement = ApplyMovement {
                    sku: entry.sku.clone(),
                    bin_location: entry.bin_location.clone(),
                    delta_on_hand: entry.variance(),
                    delta_reserved: 0,
                    kind: MovementKind::CycleCountAdjustment,
                    reason: reason.clone(),
                    actor,
                    override_availability: true,
                    occurred_at: stored.occurred_at,
                };
                if let Err(e) = self.apply_movement(movement) {
                    tracing::warn!("ledger movement for count variance failed: {e}");
                }
            }
        }
    }
}

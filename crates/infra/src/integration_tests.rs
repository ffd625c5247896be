//! Cross-component tests: dispatcher + store + bus + projections working
//! against the real aggregates.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use binflow_core::{AggregateId, BinLocation, DomainError, Sku, WorkerId};
use binflow_counts::{
    CompletePlan, CountScope, CreatePlan, CycleCountPlan, PlanCommand, PlanId, PlanStatus,
    RecordEntry, Reconcile, ResolveVariance, StartPlan, VarianceResolution,
};
use binflow_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use binflow_ledger::{ApplyMovement, MovementKind, StockCommand, StockLevel, StockLevelId};
use binflow_orders::{
    Claim, CreateOrder, NewLineItem, Order, OrderCommand, OrderId, OrderStatus, Priority,
    WorkerRole,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::InMemoryEventStore;
use crate::projections::{CountPlansProjection, OrdersProjection, StockByBinProjection};
use crate::read_model::InMemoryStateStore;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;

fn setup() -> (Dispatcher, Subscription<EventEnvelope<JsonValue>>) {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let subscription = bus.subscribe();
    (CommandDispatcher::new(store, bus), subscription)
}

fn sku(name: &str) -> Sku {
    Sku::new(name).unwrap()
}

fn bin(name: &str) -> BinLocation {
    BinLocation::new(name).unwrap()
}

fn new_order_id() -> (AggregateId, OrderId) {
    let aggregate_id = AggregateId::new();
    (aggregate_id, OrderId::new(aggregate_id))
}

fn dispatch_order(
    dispatcher: &Dispatcher,
    aggregate_id: AggregateId,
    command: OrderCommand,
) -> Result<usize, DispatchError> {
    dispatcher
        .dispatch::<Order>(aggregate_id, "orders.order", command, |id| {
            Order::empty(OrderId::new(id))
        })
        .map(|committed| committed.len())
}

fn create_order(dispatcher: &Dispatcher, aggregate_id: AggregateId, order_id: OrderId) {
    dispatch_order(
        dispatcher,
        aggregate_id,
        OrderCommand::CreateOrder(CreateOrder {
            order_id,
            priority: Priority::Normal,
            items: vec![
                NewLineItem {
                    sku: sku("SKU-A"),
                    bin_location: bin("A-01"),
                    required_quantity: 3,
                },
                NewLineItem {
                    sku: sku("SKU-B"),
                    bin_location: bin("B-02"),
                    required_quantity: 2,
                },
            ],
            occurred_at: Utc::now(),
        }),
    )
    .unwrap();
}

fn claim(dispatcher: &Dispatcher, aggregate_id: AggregateId, order_id: OrderId, worker: WorkerId)
    -> Result<usize, DispatchError>
{
    dispatch_order(
        dispatcher,
        aggregate_id,
        OrderCommand::Claim(Claim {
            order_id,
            worker_id: worker,
            role: WorkerRole::Picker,
            occurred_at: Utc::now(),
        }),
    )
}

#[test]
fn claim_through_dispatcher_has_one_winner() {
    let (dispatcher, _sub) = setup();
    let (aggregate_id, order_id) = new_order_id();
    create_order(&dispatcher, aggregate_id, order_id);

    let winner = WorkerId::new();
    let loser = WorkerId::new();

    assert_eq!(claim(&dispatcher, aggregate_id, order_id, winner).unwrap(), 1);

    let err = claim(&dispatcher, aggregate_id, order_id, loser).unwrap_err();
    match err {
        DispatchError::Domain(DomainError::AlreadyClaimed { owner, .. }) => {
            assert_eq!(owner, winner.to_string());
        }
        other => panic!("expected AlreadyClaimed, got {other:?}"),
    }

    // Re-claim by the winner is an idempotent no-op: nothing appended.
    assert_eq!(claim(&dispatcher, aggregate_id, order_id, winner).unwrap(), 0);
}

#[test]
fn published_envelopes_feed_the_orders_projection() {
    let (dispatcher, subscription) = setup();
    let (aggregate_id, order_id) = new_order_id();
    create_order(&dispatcher, aggregate_id, order_id);

    let picker = WorkerId::new();
    claim(&dispatcher, aggregate_id, order_id, picker).unwrap();

    let projection = OrdersProjection::new(Arc::new(InMemoryStateStore::new()));
    while let Ok(envelope) = subscription.try_recv() {
        projection.apply_envelope(&envelope).unwrap();
    }

    let rm = projection.get(order_id).unwrap();
    assert_eq!(rm.order.status(), OrderStatus::Picking);
    assert_eq!(rm.order.picker_id(), Some(picker));
    assert_eq!(projection.active_picking(picker), 1);
}

#[test]
fn ledger_movements_flow_into_the_stock_projection() {
    let (dispatcher, subscription) = setup();
    let (a, z01) = (sku("SKU-A"), bin("Z-01"));
    let stream = StockLevelId::for_location(&a, &z01);
    let actor = WorkerId::new();

    let movement = |delta: i64, kind: MovementKind, reason: &str| {
        StockCommand::ApplyMovement(ApplyMovement {
            sku: a.clone(),
            bin_location: z01.clone(),
            delta_on_hand: delta,
            delta_reserved: 0,
            kind,
            reason: reason.to_string(),
            actor,
            override_availability: false,
            occurred_at: Utc::now(),
        })
    };

    let dispatch = |cmd: StockCommand| {
        dispatcher.dispatch::<StockLevel>(stream.0, "ledger.stock", cmd, |id| {
            StockLevel::empty(StockLevelId(id))
        })
    };

    dispatch(movement(79, MovementKind::Receipt, "inbound")).unwrap();
    dispatch(movement(-4, MovementKind::Pick, "order pick")).unwrap();

    // Over-draw is rejected by the rehydrated aggregate.
    let err = dispatch(movement(-100, MovementKind::Pick, "order pick")).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Domain(DomainError::InsufficientStock { available: 75, .. })
    ));

    let projection = StockByBinProjection::new(Arc::new(InMemoryStateStore::new()));
    while let Ok(envelope) = subscription.try_recv() {
        projection.apply_envelope(&envelope).unwrap();
    }
    assert_eq!(projection.get(&a, &z01).unwrap().quantity_on_hand, 75);
    assert_eq!(projection.contents_of_bin(&z01), vec![(a.clone(), 75)]);
}

#[test]
fn count_plan_reconciliation_gate_through_dispatcher() {
    let (dispatcher, subscription) = setup();
    let aggregate_id = AggregateId::new();
    let plan_id = PlanId::new(aggregate_id);
    let counter = WorkerId::new();

    let dispatch = |cmd: PlanCommand| {
        dispatcher.dispatch::<CycleCountPlan>(aggregate_id, "counts.plan", cmd, |id| {
            CycleCountPlan::empty(PlanId::new(id))
        })
    };

    dispatch(PlanCommand::CreatePlan(CreatePlan {
        plan_id,
        scope: CountScope::default(),
        assigned_to: Some(counter),
        occurred_at: Utc::now(),
    }))
    .unwrap();
    dispatch(PlanCommand::StartPlan(StartPlan {
        plan_id,
        actor: counter,
        occurred_at: Utc::now(),
    }))
    .unwrap();
    dispatch(PlanCommand::RecordEntry(RecordEntry {
        plan_id,
        sku: sku("SKU-A"),
        bin_location: bin("Z-01"),
        system_quantity: 50,
        counted_quantity: 47,
        actor: counter,
        occurred_at: Utc::now(),
    }))
    .unwrap();
    dispatch(PlanCommand::CompletePlan(CompletePlan {
        plan_id,
        actor: counter,
        auto_adjust_tolerance: 0,
        occurred_at: Utc::now(),
    }))
    .unwrap();

    let err = dispatch(PlanCommand::Reconcile(Reconcile {
        plan_id,
        actor: counter,
        occurred_at: Utc::now(),
    }))
    .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Domain(DomainError::UnresolvedVariances { pending: 1, .. })
    ));

    let plan = dispatcher
        .load::<CycleCountPlan>(aggregate_id, |id| CycleCountPlan::empty(PlanId::new(id)))
        .unwrap();
    let entry_id = plan.entries()[0].id;

    dispatch(PlanCommand::ResolveVariance(ResolveVariance {
        plan_id,
        entry_id,
        resolution: VarianceResolution::Approve,
        actor: counter,
        occurred_at: Utc::now(),
    }))
    .unwrap();
    dispatch(PlanCommand::Reconcile(Reconcile {
        plan_id,
        actor: counter,
        occurred_at: Utc::now(),
    }))
    .unwrap();

    let projection = CountPlansProjection::new(Arc::new(InMemoryStateStore::new()));
    while let Ok(envelope) = subscription.try_recv() {
        projection.apply_envelope(&envelope).unwrap();
    }
    assert_eq!(projection.get(plan_id).unwrap().status(), PlanStatus::Reconciled);
}

#[test]
fn dispatcher_survives_rehydration_round_trips() {
    let (dispatcher, _sub) = setup();
    let (aggregate_id, order_id) = new_order_id();
    create_order(&dispatcher, aggregate_id, order_id);
    let picker = WorkerId::new();
    claim(&dispatcher, aggregate_id, order_id, picker).unwrap();

    // Rehydrate from the persisted stream only.
    let order = dispatcher
        .load::<Order>(aggregate_id, |id| Order::empty(OrderId::new(id)))
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Picking);
    assert_eq!(order.items().len(), 2);
    assert_eq!(order.picker_id(), Some(picker));
}

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use binflow_core::{Aggregate, AggregateId, WorkerId};
use binflow_events::EventEnvelope;
use binflow_orders::{Order, OrderEvent, OrderId, OrderStatus};

use super::ProjectionError;
use crate::read_model::StateStore;

/// Queryable order read model: the rehydrated aggregate plus bookkeeping.
///
/// The projection applies each published event through the aggregate's own
/// `apply`, so the read model can never drift from the domain semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReadModel {
    pub order: Order,
    pub updated_at: DateTime<Utc>,
}

/// Orders projection: one read-model record per order stream.
#[derive(Debug)]
pub struct OrdersProjection<S>
where
    S: StateStore<AggregateId, OrderReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> OrdersProjection<S>
where
    S: StateStore<AggregateId, OrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, order_id: OrderId) -> Option<OrderReadModel> {
        self.store.get(&order_id.0)
    }

    pub fn list(&self) -> Vec<OrderReadModel> {
        let mut out = self.store.list();
        out.sort_by_key(|rm| *rm.order.id_typed().0.as_uuid());
        out
    }

    /// Number of orders currently in PICKING owned by this worker (the
    /// claim-cap input).
    pub fn active_picking(&self, worker_id: WorkerId) -> usize {
        self.store
            .list()
            .into_iter()
            .filter(|rm| {
                rm.order.status() == OrderStatus::Picking
                    && rm.order.picker_id() == Some(worker_id)
            })
            .count()
    }

    /// Apply a published envelope. Idempotent for at-least-once delivery:
    /// replays at or below the stream cursor are ignored.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let last = *cursors.get(&aggregate_id).unwrap_or(&0);

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let mut rm = self.store.get(&aggregate_id).unwrap_or_else(|| OrderReadModel {
            order: Order::empty(OrderId::new(aggregate_id)),
            updated_at: Utc::now(),
        });
        rm.order.apply(&event);
        rm.updated_at = Utc::now();
        self.store.upsert(aggregate_id, rm);

        // Advance cursor after successful apply.
        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    /// Rebuild from scratch by replaying envelopes (disposable read model).
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryStateStore;
    use binflow_core::{BinLocation, Sku};
    use binflow_events::Event;
    use binflow_orders::{
        Claim, CreateOrder, NewLineItem, OrderCommand, Priority, WorkerRole,
    };
    use std::sync::Arc;
    use uuid::Uuid;

    fn envelope(aggregate_id: AggregateId, seq: u64, event: &OrderEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            aggregate_id,
            "orders.order",
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn order_events() -> (AggregateId, Vec<OrderEvent>) {
        let aggregate_id = AggregateId::new();
        let order_id = OrderId::new(aggregate_id);
        let picker = WorkerId::new();
        let mut order = Order::empty(order_id);
        let mut all = Vec::new();

        for cmd in [
            OrderCommand::CreateOrder(CreateOrder {
                order_id,
                priority: Priority::Normal,
                items: vec![NewLineItem {
                    sku: Sku::new("SKU-A").unwrap(),
                    bin_location: BinLocation::new("A-01").unwrap(),
                    required_quantity: 3,
                }],
                occurred_at: Utc::now(),
            }),
            OrderCommand::Claim(Claim {
                order_id,
                worker_id: picker,
                role: WorkerRole::Picker,
                occurred_at: Utc::now(),
            }),
        ] {
            let events = order.handle(&cmd).unwrap();
            for e in &events {
                order.apply(e);
            }
            all.extend(events);
        }

        (aggregate_id, all)
    }

    #[test]
    fn applies_events_and_tracks_picking_counts() {
        let projection = OrdersProjection::new(Arc::new(InMemoryStateStore::new()));
        let (aggregate_id, events) = order_events();

        for (i, e) in events.iter().enumerate() {
            projection.apply_envelope(&envelope(aggregate_id, i as u64 + 1, e)).unwrap();
        }

        let rm = projection.get(OrderId::new(aggregate_id)).unwrap();
        assert_eq!(rm.order.status(), OrderStatus::Picking);
        let picker = rm.order.picker_id().unwrap();
        assert_eq!(projection.active_picking(picker), 1);
        assert_eq!(projection.active_picking(WorkerId::new()), 0);
    }

    #[test]
    fn replayed_envelopes_are_ignored() {
        let projection = OrdersProjection::new(Arc::new(InMemoryStateStore::new()));
        let (aggregate_id, events) = order_events();

        let env = envelope(aggregate_id, 1, &events[0]);
        projection.apply_envelope(&env).unwrap();
        projection.apply_envelope(&env).unwrap();

        let rm = projection.get(OrderId::new(aggregate_id)).unwrap();
        // A version of 1 proves the duplicate did not apply twice.
        use binflow_core::AggregateRoot;
        assert_eq!(rm.order.version(), 1);
    }

    #[test]
    fn sequence_gaps_are_rejected() {
        let projection = OrdersProjection::new(Arc::new(InMemoryStateStore::new()));
        let (aggregate_id, events) = order_events();

        projection.apply_envelope(&envelope(aggregate_id, 1, &events[0])).unwrap();
        let err = projection
            .apply_envelope(&envelope(aggregate_id, 3, &events[1]))
            .unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::NonMonotonicSequence { last: 1, found: 3 }
        ));
    }

    #[test]
    fn rebuild_replays_out_of_order_envelopes() {
        let projection = OrdersProjection::new(Arc::new(InMemoryStateStore::new()));
        let (aggregate_id, events) = order_events();

        let envs: Vec<_> = events
            .iter()
            .enumerate()
            .rev()
            .map(|(i, e)| envelope(aggregate_id, i as u64 + 1, e))
            .collect();

        projection.rebuild_from_scratch(envs).unwrap();
        let rm = projection.get(OrderId::new(aggregate_id)).unwrap();
        assert_eq!(rm.order.status(), OrderStatus::Picking);
    }

    #[test]
    fn event_type_strings_are_namespaced() {
        let (_, events) = order_events();
        assert_eq!(events[0].event_type(), "orders.order.created");
        assert_eq!(events[1].event_type(), "orders.order.claimed");
    }
}

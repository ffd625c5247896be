use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use binflow_core::{Aggregate, AggregateId};
use binflow_counts::{CycleCountPlan, PlanEvent, PlanId};
use binflow_events::EventEnvelope;

use super::ProjectionError;
use crate::read_model::StateStore;

/// Cycle count plan projection: the rehydrated aggregate per plan stream.
#[derive(Debug)]
pub struct CountPlansProjection<S>
where
    S: StateStore<AggregateId, CycleCountPlan>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> CountPlansProjection<S>
where
    S: StateStore<AggregateId, CycleCountPlan>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, plan_id: PlanId) -> Option<CycleCountPlan> {
        self.store.get(&plan_id.0)
    }

    pub fn list(&self) -> Vec<CycleCountPlan> {
        let mut out = self.store.list();
        out.sort_by_key(|p| *p.id_typed().0.as_uuid());
        out
    }

    /// Apply a published envelope. Idempotent for at-least-once delivery.
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
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: PlanEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let mut plan = self
            .store
            .get(&aggregate_id)
            .unwrap_or_else(|| CycleCountPlan::empty(PlanId::new(aggregate_id)));
        plan.apply(&event);
        self.store.upsert(aggregate_id, plan);

        cursors.insert(aggregate_id, seq);
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use binflow_core::{AggregateId, BinLocation, Sku};
use binflow_events::EventEnvelope;
use binflow_ledger::{StockEvent, StockLevelId};

use super::ProjectionError;
use crate::read_model::StateStore;

/// Current balance for one (SKU, bin) stream, materialized from the
/// movement log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevelReadModel {
    pub stock_level_id: StockLevelId,
    pub sku: Sku,
    pub bin_location: BinLocation,
    pub quantity_on_hand: i64,
    pub reserved: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockLevelReadModel {
    pub fn available(&self) -> i64 {
        self.quantity_on_hand - self.reserved
    }
}

/// Stock projection, queryable by stream and by bin. The per-bin view
/// feeds capacity evaluation after every movement.
#[derive(Debug)]
pub struct StockByBinProjection<S>
where
    S: StateStore<AggregateId, StockLevelReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> StockByBinProjection<S>
where
    S: StateStore<AggregateId, StockLevelReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, sku: &Sku, bin_location: &BinLocation) -> Option<StockLevelReadModel> {
        let id = StockLevelId::for_location(sku, bin_location);
        self.store.get(&id.0)
    }

    pub fn list(&self) -> Vec<StockLevelReadModel> {
        let mut out = self.store.list();
        out.sort_by(|a, b| {
            (&a.bin_location, &a.sku).cmp(&(&b.bin_location, &b.sku))
        });
        out
    }

    /// On-hand quantities per SKU in one bin — the capacity evaluator's
    /// utilization input.
    pub fn contents_of_bin(&self, bin_location: &BinLocation) -> Vec<(Sku, i64)> {
        let mut out: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|rm| rm.bin_location == *bin_location)
            .map(|rm| (rm.sku, rm.quantity_on_hand))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
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

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        // Balances come from the event's after-values; the movement log is
        // the source of truth and this view just mirrors it.
        let StockEvent::StockMoved(moved) = event;
        self.store.upsert(
            aggregate_id,
            StockLevelReadModel {
                stock_level_id: moved.stock_level_id,
                sku: moved.sku,
                bin_location: moved.bin_location,
                quantity_on_hand: moved.on_hand_after,
                reserved: moved.reserved_after,
                updated_at: moved.occurred_at,
            },
        );

        cursors.insert(aggregate_id, seq);
        Ok(())
    }
}

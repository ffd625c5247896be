use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use binflow_core::{BinLocation, DomainError, Sku};

use crate::rule::{
    resolve_rule, status_for, AlertId, CapacityRule, CapacityStatus, CapacityType, RuleId,
};

/// Bin metadata backing zone / location-type scope matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinProfile {
    pub location: BinLocation,
    pub zone: String,
    pub location_type: String,
}

/// Physical attributes of a SKU, for weight/volume utilization. Unknown
/// SKUs contribute zero to those dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuSpec {
    pub sku: Sku,
    pub unit_weight_kg: f64,
    pub unit_volume_l: f64,
}

/// Derived per-(bin, type) state. Recomputed on every relevant ledger
/// mutation, never hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCapacitySnapshot {
    pub bin_location: BinLocation,
    pub capacity_type: CapacityType,
    pub current_utilization: f64,
    pub percent: Option<f64>,
    pub matched_rule_id: Option<RuleId>,
    pub status: CapacityStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityAlert {
    pub id: AlertId,
    pub bin_location: BinLocation,
    pub alert_type: CapacityType,
    pub status: CapacityStatus,
    pub message: String,
    pub current_utilization: f64,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct EvaluatorState {
    rules: Vec<CapacityRule>,
    bins: HashMap<BinLocation, BinProfile>,
    skus: HashMap<Sku, SkuSpec>,
    snapshots: HashMap<(BinLocation, CapacityType), LocationCapacitySnapshot>,
    /// Open (unacknowledged) alerts, one per (bin, type).
    open_alerts: HashMap<(BinLocation, CapacityType), CapacityAlert>,
    acknowledged_alerts: Vec<CapacityAlert>,
}

/// Evaluates bin utilization against the ruleset and maintains snapshots
/// and alerts. All mutable state sits behind one lock, serializing per-bin
/// recomputation.
#[derive(Default)]
pub struct CapacityEvaluator {
    state: Mutex<EvaluatorState>,
}

impl CapacityEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_rule(&self, rule: CapacityRule) -> Result<CapacityRule, DomainError> {
        rule.validate()?;
        let mut state = self.state.lock().expect("capacity state lock poisoned");
        if let Some(existing) = state.rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule.clone();
        } else {
            state.rules.push(rule.clone());
        }
        Ok(rule)
    }

    pub fn remove_rule(&self, id: RuleId) -> Result<(), DomainError> {
        let mut state = self.state.lock().expect("capacity state lock poisoned");
        let before = state.rules.len();
        state.rules.retain(|r| r.id != id);
        if state.rules.len() == before {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    pub fn rules(&self) -> Vec<CapacityRule> {
        self.state
            .lock()
            .expect("capacity state lock poisoned")
            .rules
            .clone()
    }

    pub fn register_bin(&self, profile: BinProfile) {
        let mut state = self.state.lock().expect("capacity state lock poisoned");
        state.bins.insert(profile.location.clone(), profile);
    }

    pub fn register_sku(&self, spec: SkuSpec) {
        let mut state = self.state.lock().expect("capacity state lock poisoned");
        state.skus.insert(spec.sku.clone(), spec);
    }

    /// Evaluate one (bin, type) against the current ruleset given the bin's
    /// contents (per-SKU on-hand quantities). Stores the snapshot and
    /// upserts/refreshes the open alert when the status warrants one.
    pub fn evaluate(
        &self,
        bin_location: &BinLocation,
        capacity_type: CapacityType,
        contents: &[(Sku, i64)],
    ) -> LocationCapacitySnapshot {
        let mut state = self.state.lock().expect("capacity state lock poisoned");
        let snapshot = Self::compute(&state, bin_location, capacity_type, contents);

        state
            .snapshots
            .insert((bin_location.clone(), capacity_type), snapshot.clone());

        match snapshot.status {
            CapacityStatus::Warning | CapacityStatus::Exceeded => {
                let now = Utc::now();
                let message = match snapshot.percent {
                    Some(pct) => format!(
                        "bin {bin_location} at {:.1}% of {capacity_type:?} capacity",
                        pct
                    ),
                    None => format!("bin {bin_location} over {capacity_type:?} capacity"),
                };
                let key = (bin_location.clone(), capacity_type);
                let alert = state
                    .open_alerts
                    .entry(key)
                    .and_modify(|a| {
                        a.status = snapshot.status;
                        a.message = message.clone();
                        a.current_utilization = snapshot.current_utilization;
                        a.updated_at = now;
                    })
                    .or_insert_with(|| CapacityAlert {
                        id: AlertId::new(),
                        bin_location: bin_location.clone(),
                        alert_type: capacity_type,
                        status: snapshot.status,
                        message,
                        current_utilization: snapshot.current_utilization,
                        acknowledged: false,
                        created_at: now,
                        updated_at: now,
                    });
                debug!(
                    bin = %bin_location,
                    capacity_type = ?capacity_type,
                    status = ?snapshot.status,
                    alert_id = %alert.id,
                    "capacity breach"
                );
            }
            // Return to NORMAL does not clear the alert; acknowledgement is
            // a human action decoupled from the numeric state.
            CapacityStatus::Normal => {}
        }

        snapshot
    }

    /// Evaluate all capacity types for one bin (the post-movement hook).
    pub fn evaluate_bin(
        &self,
        bin_location: &BinLocation,
        contents: &[(Sku, i64)],
    ) -> Vec<LocationCapacitySnapshot> {
        CapacityType::ALL
            .iter()
            .map(|&t| self.evaluate(bin_location, t, contents))
            .collect()
    }

    pub fn snapshots(
        &self,
        capacity_type: Option<CapacityType>,
        alerts_only: bool,
    ) -> Vec<LocationCapacitySnapshot> {
        let state = self.state.lock().expect("capacity state lock poisoned");
        let mut out: Vec<_> = state
            .snapshots
            .values()
            .filter(|s| capacity_type.is_none_or(|t| s.capacity_type == t))
            .filter(|s| !alerts_only || s.status != CapacityStatus::Normal)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.bin_location.cmp(&b.bin_location));
        out
    }

    pub fn alerts(&self, include_acknowledged: bool) -> Vec<CapacityAlert> {
        let state = self.state.lock().expect("capacity state lock poisoned");
        let mut out: Vec<_> = state.open_alerts.values().cloned().collect();
        if include_acknowledged {
            out.extend(state.acknowledged_alerts.iter().cloned());
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// The only path that closes an alert. A later breach on the same
    /// (bin, type) opens a fresh alert with a new id.
    pub fn acknowledge(&self, alert_id: AlertId) -> Result<CapacityAlert, DomainError> {
        let mut state = self.state.lock().expect("capacity state lock poisoned");
        let key = state
            .open_alerts
            .iter()
            .find(|(_, a)| a.id == alert_id)
            .map(|(k, _)| k.clone())
            .ok_or(DomainError::NotFound)?;

        let mut alert = state.open_alerts.remove(&key).expect("key just resolved");
        alert.acknowledged = true;
        alert.updated_at = Utc::now();
        state.acknowledged_alerts.push(alert.clone());
        Ok(alert)
    }

    fn compute(
        state: &EvaluatorState,
        bin_location: &BinLocation,
        capacity_type: CapacityType,
        contents: &[(Sku, i64)],
    ) -> LocationCapacitySnapshot {
        let utilization = match capacity_type {
            CapacityType::Quantity => contents.iter().map(|(_, qty)| *qty as f64).sum(),
            CapacityType::Weight => contents
                .iter()
                .map(|(sku, qty)| {
                    state
                        .skus
                        .get(sku)
                        .map(|s| s.unit_weight_kg * *qty as f64)
                        .unwrap_or(0.0)
                })
                .sum(),
            CapacityType::Volume => contents
                .iter()
                .map(|(sku, qty)| {
                    state
                        .skus
                        .get(sku)
                        .map(|s| s.unit_volume_l * *qty as f64)
                        .unwrap_or(0.0)
                })
                .sum(),
        };

        // Unregistered bins still match ALL-scoped rules.
        let default_profile = BinProfile {
            location: bin_location.clone(),
            zone: String::new(),
            location_type: String::new(),
        };
        let profile = state.bins.get(bin_location).unwrap_or(&default_profile);

        match resolve_rule(&state.rules, profile, capacity_type) {
            Some(rule) => {
                let percent = utilization / rule.maximum_capacity * 100.0;
                LocationCapacitySnapshot {
                    bin_location: bin_location.clone(),
                    capacity_type,
                    current_utilization: utilization,
                    percent: Some(percent),
                    matched_rule_id: Some(rule.id),
                    status: status_for(percent, rule),
                }
            }
            None => LocationCapacitySnapshot {
                bin_location: bin_location.clone(),
                capacity_type,
                current_utilization: utilization,
                percent: None,
                matched_rule_id: None,
                status: CapacityStatus::Normal,
            },
        }
    }
}

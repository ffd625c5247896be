use serde::{Deserialize, Serialize};
use uuid::Uuid;

use binflow_core::{BinLocation, DomainError};

use crate::evaluator::BinProfile;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RuleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AlertId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Dimension a rule constrains. Weight and volume derive from registered
/// per-SKU physical attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityType {
    Quantity,
    Weight,
    Volume,
}

impl CapacityType {
    pub const ALL: [CapacityType; 3] =
        [CapacityType::Quantity, CapacityType::Weight, CapacityType::Volume];
}

/// Which bins a rule applies to. Most specific scope wins; equal
/// specificity is broken by the rule's `priority`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "scope_value", rename_all = "snake_case")]
pub enum RuleScope {
    All,
    Zone(String),
    LocationType(String),
    SpecificLocation(BinLocation),
}

impl RuleScope {
    /// Higher value beats lower when several rules match one bin.
    pub fn specificity(&self) -> u8 {
        match self {
            RuleScope::All => 0,
            RuleScope::Zone(_) => 1,
            RuleScope::LocationType(_) => 2,
            RuleScope::SpecificLocation(_) => 3,
        }
    }

    pub fn matches(&self, profile: &BinProfile) -> bool {
        match self {
            RuleScope::All => true,
            RuleScope::Zone(zone) => profile.zone == *zone,
            RuleScope::LocationType(kind) => profile.location_type == *kind,
            RuleScope::SpecificLocation(bin) => profile.location == *bin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityRule {
    pub id: RuleId,
    pub scope: RuleScope,
    pub capacity_type: CapacityType,
    pub maximum_capacity: f64,
    pub warning_threshold_pct: f64,
    pub allow_overfill: bool,
    /// Extra headroom (in percent points above 100) tolerated when
    /// `allow_overfill` is set.
    pub overfill_threshold_pct: f64,
    pub priority: i32,
}

impl CapacityRule {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.maximum_capacity <= 0.0 {
            return Err(DomainError::validation("maximum_capacity must be positive"));
        }
        if !(0.0..=100.0).contains(&self.warning_threshold_pct) {
            return Err(DomainError::validation(
                "warning_threshold_pct must be within 0..=100",
            ));
        }
        if self.overfill_threshold_pct < 0.0 {
            return Err(DomainError::validation(
                "overfill_threshold_pct cannot be negative",
            ));
        }
        if let RuleScope::Zone(v) | RuleScope::LocationType(v) = &self.scope {
            if v.trim().is_empty() {
                return Err(DomainError::validation("scope_value cannot be empty"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityStatus {
    Normal,
    Warning,
    Exceeded,
}

/// Pick the winning rule for a bin and capacity type: highest specificity,
/// then highest priority.
pub fn resolve_rule<'a>(
    rules: &'a [CapacityRule],
    profile: &BinProfile,
    capacity_type: CapacityType,
) -> Option<&'a CapacityRule> {
    rules
        .iter()
        .filter(|r| r.capacity_type == capacity_type && r.scope.matches(profile))
        .max_by_key(|r| (r.scope.specificity(), r.priority))
}

/// Status thresholds. With overfill allowed, the band between 100% and
/// 100% + overfill threshold stays at WARNING.
pub fn status_for(percent: f64, rule: &CapacityRule) -> CapacityStatus {
    if percent >= 100.0 {
        if !rule.allow_overfill || percent >= 100.0 + rule.overfill_threshold_pct {
            CapacityStatus::Exceeded
        } else {
            CapacityStatus::Warning
        }
    } else if percent >= rule.warning_threshold_pct {
        CapacityStatus::Warning
    } else {
        CapacityStatus::Normal
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use binflow_core::{Aggregate, AggregateId, AggregateRoot, BinLocation, DomainError, Sku, WorkerId};
use binflow_events::Event;

/// Stock level identifier.
///
/// Deterministic: derived from the (sku, bin) pair so every pair maps to
/// exactly one event stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockLevelId(pub AggregateId);

impl StockLevelId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The canonical stream id for a (sku, bin) pair.
    pub fn for_location(sku: &Sku, bin_location: &BinLocation) -> Self {
        Self(AggregateId::derived(&format!("{sku}|{bin_location}")))
    }
}

impl core::fmt::Display for StockLevelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Why stock moved. Recorded on every movement for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Receipt,
    Pick,
    PickUndo,
    Ship,
    Reservation,
    ReservationRelease,
    CycleCountAdjustment,
    ManualAdjustment,
}

/// Aggregate root: StockLevel (per SKU per bin).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    id: StockLevelId,
    sku: Option<Sku>,
    bin_location: Option<BinLocation>,
    quantity_on_hand: i64,
    reserved: i64,
    version: u64,
}

impl StockLevel {
    /// Create an empty, not-yet-moved aggregate instance for rehydration.
    ///
    /// A stock stream comes into existence with its first movement (receipt);
    /// there is no separate create command.
    pub fn empty(id: StockLevelId) -> Self {
        Self {
            id,
            sku: None,
            bin_location: None,
            quantity_on_hand: 0,
            reserved: 0,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> StockLevelId {
        self.id
    }

    pub fn sku(&self) -> Option<&Sku> {
        self.sku.as_ref()
    }

    pub fn bin_location(&self) -> Option<&BinLocation> {
        self.bin_location.as_ref()
    }

    pub fn quantity_on_hand(&self) -> i64 {
        self.quantity_on_hand
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    /// Available = on hand − reserved. Never negative outside an override.
    pub fn available(&self) -> i64 {
        self.quantity_on_hand - self.reserved
    }
}

impl AggregateRoot for StockLevel {
    type Id = StockLevelId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ApplyMovement — the sole mutation entry point for the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyMovement {
    pub sku: Sku,
    pub bin_location: BinLocation,
    pub delta_on_hand: i64,
    pub delta_reserved: i64,
    pub kind: MovementKind,
    pub reason: String,
    pub actor: WorkerId,
    /// Administrative override: permit the movement even if available stock
    /// would go negative. Never silently applied.
    pub override_availability: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    ApplyMovement(ApplyMovement),
}

/// Event: StockMoved. The immutable audit record of a ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMoved {
    pub movement_id: Uuid,
    pub stock_level_id: StockLevelId,
    pub sku: Sku,
    pub bin_location: BinLocation,
    pub delta_on_hand: i64,
    pub delta_reserved: i64,
    pub kind: MovementKind,
    pub reason: String,
    pub actor: WorkerId,
    pub on_hand_before: i64,
    pub on_hand_after: i64,
    pub reserved_before: i64,
    pub reserved_after: i64,
    pub overridden: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    StockMoved(StockMoved),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockMoved(_) => "ledger.stock.moved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::StockMoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockLevel {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::StockMoved(e) => {
                self.sku = Some(e.sku.clone());
                self.bin_location = Some(e.bin_location.clone());
                self.quantity_on_hand = e.on_hand_after;
                self.reserved = e.reserved_after;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::ApplyMovement(cmd) => self.handle_movement(cmd),
        }
    }
}

impl StockLevel {
    fn ensure_location(&self, sku: &Sku, bin_location: &BinLocation) -> Result<(), DomainError> {
        // First movement establishes the location; later movements must match.
        if let (Some(s), Some(b)) = (&self.sku, &self.bin_location) {
            if s != sku || b != bin_location {
                return Err(DomainError::invariant(format!(
                    "movement targets {sku}@{bin_location} but stream holds {s}@{b}"
                )));
            }
        }
        Ok(())
    }

    fn handle_movement(&self, cmd: &ApplyMovement) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_location(&cmd.sku, &cmd.bin_location)?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::ReasonRequired {
                action: "stock movement",
            });
        }

        if cmd.delta_on_hand == 0 && cmd.delta_reserved == 0 {
            return Err(DomainError::invalid_quantity("movement deltas are both zero"));
        }

        let on_hand_after = self.quantity_on_hand + cmd.delta_on_hand;
        let reserved_after = self.reserved + cmd.delta_reserved;

        if reserved_after < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "reserved quantity cannot go negative (current {}, delta {})",
                self.reserved, cmd.delta_reserved
            )));
        }

        let available_after = on_hand_after - reserved_after;
        if (on_hand_after < 0 || available_after < 0) && !cmd.override_availability {
            return Err(DomainError::InsufficientStock {
                sku: cmd.sku.to_string(),
                bin_location: cmd.bin_location.to_string(),
                available: self.available(),
                requested: -cmd.delta_on_hand.min(0) + cmd.delta_reserved.max(0),
            });
        }

        Ok(vec![StockEvent::StockMoved(StockMoved {
            movement_id: Uuid::now_v7(),
            stock_level_id: self.id,
            sku: cmd.sku.clone(),
            bin_location: cmd.bin_location.clone(),
            delta_on_hand: cmd.delta_on_hand,
            delta_reserved: cmd.delta_reserved,
            kind: cmd.kind,
            reason: cmd.reason.clone(),
            actor: cmd.actor,
            on_hand_before: self.quantity_on_hand,
            on_hand_after,
            reserved_before: self.reserved,
            reserved_after,
            overridden: cmd.override_availability && (on_hand_after < 0 || available_after < 0),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sku() -> Sku {
        Sku::new("SKU-100").unwrap()
    }

    fn test_bin() -> BinLocation {
        BinLocation::new("A-01").unwrap()
    }

    fn test_level() -> StockLevel {
        StockLevel::empty(StockLevelId::for_location(&test_sku(), &test_bin()))
    }

    fn movement(delta_on_hand: i64, delta_reserved: i64, kind: MovementKind) -> StockCommand {
        StockCommand::ApplyMovement(ApplyMovement {
            sku: test_sku(),
            bin_location: test_bin(),
            delta_on_hand,
            delta_reserved,
            kind,
            reason: "test movement".to_string(),
            actor: WorkerId::new(),
            override_availability: false,
            occurred_at: Utc::now(),
        })
    }

    fn apply_all(level: &mut StockLevel, events: &[StockEvent]) {
        for e in events {
            level.apply(e);
        }
    }

    #[test]
    fn receipt_then_pick_tracks_balances() {
        let mut level = test_level();

        let events = level.handle(&movement(10, 0, MovementKind::Receipt)).unwrap();
        apply_all(&mut level, &events);
        assert_eq!(level.quantity_on_hand(), 10);
        assert_eq!(level.available(), 10);

        let events = level.handle(&movement(-3, 0, MovementKind::Pick)).unwrap();
        apply_all(&mut level, &events);
        assert_eq!(level.quantity_on_hand(), 7);
        assert_eq!(level.version(), 2);
    }

    #[test]
    fn movement_records_before_and_after_quantities() {
        let mut level = test_level();
        let events = level.handle(&movement(10, 0, MovementKind::Receipt)).unwrap();
        apply_all(&mut level, &events);

        let events = level.handle(&movement(-4, 0, MovementKind::Pick)).unwrap();
        match &events[0] {
            StockEvent::StockMoved(e) => {
                assert_eq!(e.on_hand_before, 10);
                assert_eq!(e.on_hand_after, 6);
                assert!(!e.overridden);
            }
        }
    }

    #[test]
    fn insufficient_stock_is_rejected_without_override() {
        let mut level = test_level();
        let events = level.handle(&movement(5, 0, MovementKind::Receipt)).unwrap();
        apply_all(&mut level, &events);

        let err = level.handle(&movement(-6, 0, MovementKind::Pick)).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { available: 5, .. }));
        // No mutation on rejection.
        assert_eq!(level.quantity_on_hand(), 5);
    }

    #[test]
    fn reservation_reduces_available_and_gates_picks() {
        let mut level = test_level();
        let events = level.handle(&movement(5, 0, MovementKind::Receipt)).unwrap();
        apply_all(&mut level, &events);

        let events = level.handle(&movement(0, 4, MovementKind::Reservation)).unwrap();
        apply_all(&mut level, &events);
        assert_eq!(level.available(), 1);

        // A pick that only burns on-hand below the reservation floor fails.
        let err = level.handle(&movement(-2, 0, MovementKind::Pick)).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));
    }

    #[test]
    fn administrative_override_permits_negative_available() {
        let mut level = test_level();
        let cmd = StockCommand::ApplyMovement(ApplyMovement {
            sku: test_sku(),
            bin_location: test_bin(),
            delta_on_hand: -2,
            delta_reserved: 0,
            kind: MovementKind::ManualAdjustment,
            reason: "shrinkage write-off".to_string(),
            actor: WorkerId::new(),
            override_availability: true,
            occurred_at: Utc::now(),
        });

        let events = level.handle(&cmd).unwrap();
        match &events[0] {
            StockEvent::StockMoved(e) => assert!(e.overridden),
        }
    }

    #[test]
    fn reason_is_mandatory() {
        let level = test_level();
        let cmd = StockCommand::ApplyMovement(ApplyMovement {
            sku: test_sku(),
            bin_location: test_bin(),
            delta_on_hand: 1,
            delta_reserved: 0,
            kind: MovementKind::Receipt,
            reason: "  ".to_string(),
            actor: WorkerId::new(),
            override_availability: false,
            occurred_at: Utc::now(),
        });

        let err = level.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::ReasonRequired { .. }));
    }

    #[test]
    fn zero_movement_is_rejected() {
        let level = test_level();
        let err = level.handle(&movement(0, 0, MovementKind::Receipt)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn reserved_cannot_go_negative() {
        let level = test_level();
        let err = level
            .handle(&movement(0, -1, MovementKind::ReservationRelease))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn stream_is_pinned_to_first_location() {
        let mut level = test_level();
        let events = level.handle(&movement(5, 0, MovementKind::Receipt)).unwrap();
        apply_all(&mut level, &events);

        let cmd = StockCommand::ApplyMovement(ApplyMovement {
            sku: test_sku(),
            bin_location: BinLocation::new("B-09").unwrap(),
            delta_on_hand: 1,
            delta_reserved: 0,
            kind: MovementKind::Receipt,
            reason: "misrouted".to_string(),
            actor: WorkerId::new(),
            override_availability: false,
            occurred_at: Utc::now(),
        });

        let err = level.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let mut level = test_level();
        let events = level.handle(&movement(5, 0, MovementKind::Receipt)).unwrap();
        apply_all(&mut level, &events);

        let before = level.clone();
        let _ = level.handle(&movement(-1, 0, MovementKind::Pick)).unwrap();
        assert_eq!(level, before);
    }
}

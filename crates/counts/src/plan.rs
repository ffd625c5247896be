use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use binflow_core::{Aggregate, AggregateId, AggregateRoot, BinLocation, DomainError, Sku, WorkerId};
use binflow_events::Event;

/// Cycle count plan identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub AggregateId);

impl PlanId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PlanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Scheduled,
    InProgress,
    Completed,
    Reconciled,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Reconciled | PlanStatus::Cancelled)
    }
}

/// What the plan covers: a location, a SKU, both, or the whole warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CountScope {
    pub bin_location: Option<BinLocation>,
    pub sku: Option<Sku>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceStatus {
    Pending,
    Approved,
    Rejected,
    AutoAdjusted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntry {
    pub id: EntryId,
    pub sku: Sku,
    pub bin_location: BinLocation,
    /// Ledger quantity snapshotted when the entry was recorded.
    pub system_quantity: i64,
    pub counted_quantity: i64,
    pub variance_status: VarianceStatus,
    pub counted_by: WorkerId,
    pub recorded_at: DateTime<Utc>,
}

impl CountEntry {
    pub fn variance(&self) -> i64 {
        self.counted_quantity - self.system_quantity
    }

    /// An entry blocks reconciliation while it is PENDING with a non-zero
    /// variance.
    pub fn blocks_reconciliation(&self) -> bool {
        self.variance_status == VarianceStatus::Pending && self.variance() != 0
    }
}

/// Aggregate root: CycleCountPlan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleCountPlan {
    id: PlanId,
    status: PlanStatus,
    scope: CountScope,
    assigned_to: Option<WorkerId>,
    entries: Vec<CountEntry>,
    version: u64,
    created: bool,
}

impl CycleCountPlan {
    pub fn empty(id: PlanId) -> Self {
        Self {
            id,
            status: PlanStatus::Scheduled,
            scope: CountScope::default(),
            assigned_to: None,
            entries: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PlanId {
        self.id
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn scope(&self) -> &CountScope {
        &self.scope
    }

    pub fn assigned_to(&self) -> Option<WorkerId> {
        self.assigned_to
    }

    pub fn entries(&self) -> &[CountEntry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> Result<&CountEntry, DomainError> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .ok_or(DomainError::NotFound)
    }

    pub fn unresolved_variances(&self) -> usize {
        self.entries.iter().filter(|e| e.blocks_reconciliation()).count()
    }
}

impl AggregateRoot for CycleCountPlan {
    type Id = PlanId;

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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePlan {
    pub plan_id: PlanId,
    pub scope: CountScope,
    pub assigned_to: Option<WorkerId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPlan {
    pub plan_id: PlanId,
    pub actor: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub plan_id: PlanId,
    pub sku: Sku,
    pub bin_location: BinLocation,
    pub system_quantity: i64,
    pub counted_quantity: i64,
    pub actor: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletePlan {
    pub plan_id: PlanId,
    pub actor: WorkerId,
    /// Non-zero variances with |variance| <= tolerance are marked
    /// AUTO_ADJUSTED in the same commit.
    pub auto_adjust_tolerance: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceResolution {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveVariance {
    pub plan_id: PlanId,
    pub entry_id: EntryId,
    pub resolution: VarianceResolution,
    pub actor: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconcile {
    pub plan_id: PlanId,
    pub actor: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPlan {
    pub plan_id: PlanId,
    pub actor: WorkerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanCommand {
    CreatePlan(CreatePlan),
    StartPlan(StartPlan),
    RecordEntry(RecordEntry),
    CompletePlan(CompletePlan),
    ResolveVariance(ResolveVariance),
    Reconcile(Reconcile),
    CancelPlan(CancelPlan),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCreated {
    pub plan_id: PlanId,
    pub scope: CountScope,
    pub assigned_to: Option<WorkerId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStarted {
    pub plan_id: PlanId,
    pub actor: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecorded {
    pub plan_id: PlanId,
    pub entry: CountEntry,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCompleted {
    pub plan_id: PlanId,
    pub actor: WorkerId,
    /// Entries auto-adjusted at completion; the caller applies their ledger
    /// deltas.
    pub auto_adjusted: Vec<EntryId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarianceResolved {
    pub plan_id: PlanId,
    pub entry_id: EntryId,
    pub status: VarianceStatus,
    pub actor: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReconciled {
    pub plan_id: PlanId,
    pub actor: WorkerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCancelled {
    pub plan_id: PlanId,
    pub actor: WorkerId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanEvent {
    PlanCreated(PlanCreated),
    PlanStarted(PlanStarted),
    EntryRecorded(EntryRecorded),
    PlanCompleted(PlanCompleted),
    VarianceResolved(VarianceResolved),
    PlanReconciled(PlanReconciled),
    PlanCancelled(PlanCancelled),
}

impl Event for PlanEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PlanEvent::PlanCreated(_) => "counts.plan.created",
            PlanEvent::PlanStarted(_) => "counts.plan.started",
            PlanEvent::EntryRecorded(_) => "counts.entry.recorded",
            PlanEvent::PlanCompleted(_) => "counts.plan.completed",
            PlanEvent::VarianceResolved(_) => "counts.variance.resolved",
            PlanEvent::PlanReconciled(_) => "counts.plan.reconciled",
            PlanEvent::PlanCancelled(_) => "counts.plan.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PlanEvent::PlanCreated(e) => e.occurred_at,
            PlanEvent::PlanStarted(e) => e.occurred_at,
            PlanEvent::EntryRecorded(e) => e.occurred_at,
            PlanEvent::PlanCompleted(e) => e.occurred_at,
            PlanEvent::VarianceResolved(e) => e.occurred_at,
            PlanEvent::PlanReconciled(e) => e.occurred_at,
            PlanEvent::PlanCancelled(e) => e.occurred_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate behaviour
// ---------------------------------------------------------------------------

impl Aggregate for CycleCountPlan {
    type Command = PlanCommand;
    type Event = PlanEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PlanEvent::PlanCreated(e) => {
                self.id = e.plan_id;
                self.status = PlanStatus::Scheduled;
                self.scope = e.scope.clone();
                self.assigned_to = e.assigned_to;
                self.entries = Vec::new();
                self.created = true;
            }
            PlanEvent::PlanStarted(_) => {
                self.status = PlanStatus::InProgress;
            }
            PlanEvent::EntryRecorded(e) => {
                self.entries.push(e.entry.clone());
            }
            PlanEvent::PlanCompleted(e) => {
                self.status = PlanStatus::Completed;
                for entry in &mut self.entries {
                    if e.auto_adjusted.contains(&entry.id) {
                        entry.variance_status = VarianceStatus::AutoAdjusted;
                    }
                }
            }
            PlanEvent::VarianceResolved(e) => {
                if let Some(entry) = self.entries.iter_mut().find(|en| en.id == e.entry_id) {
                    entry.variance_status = e.status;
                }
            }
            PlanEvent::PlanReconciled(_) => {
                self.status = PlanStatus::Reconciled;
            }
            PlanEvent::PlanCancelled(_) => {
                self.status = PlanStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PlanCommand::CreatePlan(cmd) => self.handle_create(cmd),
            PlanCommand::StartPlan(cmd) => self.handle_start(cmd),
            PlanCommand::RecordEntry(cmd) => self.handle_record(cmd),
            PlanCommand::CompletePlan(cmd) => self.handle_complete(cmd),
            PlanCommand::ResolveVariance(cmd) => self.handle_resolve(cmd),
            PlanCommand::Reconcile(cmd) => self.handle_reconcile(cmd),
            PlanCommand::CancelPlan(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl CycleCountPlan {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_plan_id(&self, plan_id: PlanId) -> Result<(), DomainError> {
        if self.id != plan_id {
            return Err(DomainError::invariant("plan_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: PlanStatus, action: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invariant(format!(
                "cannot {action} a plan in status {:?}",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePlan) -> Result<Vec<PlanEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("cycle count plan already exists"));
        }
        Ok(vec![PlanEvent::PlanCreated(PlanCreated {
            plan_id: cmd.plan_id,
            scope: cmd.scope.clone(),
            assigned_to: cmd.assigned_to,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start(&self, cmd: &StartPlan) -> Result<Vec<PlanEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_plan_id(cmd.plan_id)?;
        self.ensure_status(PlanStatus::Scheduled, "start")?;

        Ok(vec![PlanEvent::PlanStarted(PlanStarted {
            plan_id: cmd.plan_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordEntry) -> Result<Vec<PlanEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_plan_id(cmd.plan_id)?;
        self.ensure_status(PlanStatus::InProgress, "record an entry on")?;

        if cmd.counted_quantity < 0 {
            return Err(DomainError::invalid_quantity(
                "counted quantity cannot be negative",
            ));
        }
        if let Some(scope_bin) = &self.scope.bin_location {
            if *scope_bin != cmd.bin_location {
                return Err(DomainError::validation(format!(
                    "bin {} is outside the plan scope ({scope_bin})",
                    cmd.bin_location
                )));
            }
        }
        if let Some(scope_sku) = &self.scope.sku {
            if *scope_sku != cmd.sku {
                return Err(DomainError::validation(format!(
                    "sku {} is outside the plan scope ({scope_sku})",
                    cmd.sku
                )));
            }
        }
        if self
            .entries
            .iter()
            .any(|e| e.sku == cmd.sku && e.bin_location == cmd.bin_location)
        {
            return Err(DomainError::conflict(format!(
                "entry for {} at {} already recorded",
                cmd.sku, cmd.bin_location
            )));
        }

        let entry = CountEntry {
            id: EntryId::new(),
            sku: cmd.sku.clone(),
            bin_location: cmd.bin_location.clone(),
            system_quantity: cmd.system_quantity,
            counted_quantity: cmd.counted_quantity,
            variance_status: VarianceStatus::Pending,
            counted_by: cmd.actor,
            recorded_at: cmd.occurred_at,
        };

        Ok(vec![PlanEvent::EntryRecorded(EntryRecorded {
            plan_id: cmd.plan_id,
            entry,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompletePlan) -> Result<Vec<PlanEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_plan_id(cmd.plan_id)?;
        self.ensure_status(PlanStatus::InProgress, "complete")?;

        if cmd.auto_adjust_tolerance < 0 {
            return Err(DomainError::validation(
                "auto_adjust_tolerance cannot be negative",
            ));
        }

        let auto_adjusted = self
            .entries
            .iter()
            .filter(|e| {
                e.variance_status == VarianceStatus::Pending
                    && e.variance() != 0
                    && e.variance().abs() <= cmd.auto_adjust_tolerance
            })
            .map(|e| e.id)
            .collect();

        Ok(vec![PlanEvent::PlanCompleted(PlanCompleted {
            plan_id: cmd.plan_id,
            actor: cmd.actor,
            auto_adjusted,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve(&self, cmd: &ResolveVariance) -> Result<Vec<PlanEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_plan_id(cmd.plan_id)?;
        self.ensure_status(PlanStatus::Completed, "resolve a variance on")?;

        let entry = self.entry(cmd.entry_id)?;
        if entry.variance_status != VarianceStatus::Pending {
            return Err(DomainError::conflict(format!(
                "entry {} already resolved ({:?})",
                entry.id, entry.variance_status
            )));
        }

        let status = match cmd.resolution {
            VarianceResolution::Approve => VarianceStatus::Approved,
            VarianceResolution::Reject => VarianceStatus::Rejected,
        };

        Ok(vec![PlanEvent::VarianceResolved(VarianceResolved {
            plan_id: cmd.plan_id,
            entry_id: cmd.entry_id,
            status,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reconcile(&self, cmd: &Reconcile) -> Result<Vec<PlanEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_plan_id(cmd.plan_id)?;
        self.ensure_status(PlanStatus::Completed, "reconcile")?;

        let pending = self.unresolved_variances();
        if pending > 0 {
            return Err(DomainError::UnresolvedVariances {
                plan_id: cmd.plan_id.to_string(),
                pending,
            });
        }

        Ok(vec![PlanEvent::PlanReconciled(PlanReconciled {
            plan_id: cmd.plan_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelPlan) -> Result<Vec<PlanEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_plan_id(cmd.plan_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot cancel a plan in terminal status {:?}",
                self.status
            )));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::ReasonRequired { action: "cancel plan" });
        }

        Ok(vec![PlanEvent::PlanCancelled(PlanCancelled {
            plan_id: cmd.plan_id,
            actor: cmd.actor,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

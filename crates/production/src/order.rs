use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockforge_core::{
    Aggregate, AggregateRoot, BomId, DomainError, ItemId, MovementId, ProductionOrderId,
    TransactionId,
};
use stockforge_events::Event;

/// Production order lifecycle.
///
/// ```text
/// planned ──start──▶ in_progress ──complete──▶ completed
///    │                 │     ▲
///    │            suspend   resume
///    │                 ▼     │
///    │               suspended
///    └──cancel──▶ cancelled ◀──cancel── in_progress
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionStatus {
    Planned,
    InProgress,
    Suspended,
    Completed,
    Cancelled,
}

impl ProductionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProductionStatus::Completed | ProductionStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionStatus::Planned => "planned",
            ProductionStatus::InProgress => "in_progress",
            ProductionStatus::Suspended => "suspended",
            ProductionStatus::Completed => "completed",
            ProductionStatus::Cancelled => "cancelled",
        }
    }
}

/// Human-visible order number (`OP-01`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub const PREFIX: &'static str = "OP";

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let n = raw.trim().to_ascii_uppercase();
        if n.is_empty() || n.len() > 32 {
            return Err(DomainError::validation("order number must be 1..=32 characters"));
        }
        if !n.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '/') {
            return Err(DomainError::validation(format!(
                "order number '{raw}' may only contain letters, digits, '-' and '/'"
            )));
        }
        Ok(Self(n))
    }

    /// Next `OP-NN` number after the highest generated one in `existing`.
    /// Human-assigned numbers outside the `OP-<digits>` shape are ignored.
    pub fn next_in<'a>(existing: impl IntoIterator<Item = &'a OrderNumber>) -> Self {
        let max = existing
            .into_iter()
            .filter_map(|n| n.generated_sequence())
            .max()
            .unwrap_or(0);
        Self(format!("{}-{:02}", Self::PREFIX, max + 1))
    }

    fn generated_sequence(&self) -> Option<u32> {
        let digits = self.0.strip_prefix(Self::PREFIX)?.strip_prefix('-')?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-fatal issues noticed while completing an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionWarning {
    /// A component unload left on-hand below zero (permissive stock policy).
    NegativeStock { item: ItemId, resulting: i64 },
    /// The BOM listed the finished good as its own component; the line was skipped.
    SelfReferencingComponent { item: ItemId },
}

/// What a completion wrote to the ledger, kept on the order for idempotent replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub transaction: TransactionId,
    pub produced_quantity: i64,
    pub movements: Vec<MovementId>,
    pub warnings: Vec<CompletionWarning>,
    pub completed_at: DateTime<Utc>,
}

/// Aggregate root: ProductionOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionOrder {
    id: ProductionOrderId,
    number: Option<OrderNumber>,
    finished_good: Option<ItemId>,
    bom: Option<BomId>,
    requested_quantity: i64,
    produced_quantity: i64,
    status: ProductionStatus,
    planned_start: Option<DateTime<Utc>>,
    estimated_end: Option<DateTime<Utc>>,
    completion: Option<CompletionRecord>,
    version: u64,
    created: bool,
}

impl ProductionOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductionOrderId) -> Self {
        Self {
            id,
            number: None,
            finished_good: None,
            bom: None,
            requested_quantity: 0,
            produced_quantity: 0,
            status: ProductionStatus::Planned,
            planned_start: None,
            estimated_end: None,
            completion: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductionOrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn number(&self) -> Option<&OrderNumber> {
        self.number.as_ref()
    }

    pub fn finished_good(&self) -> Option<ItemId> {
        self.finished_good
    }

    /// BOM version fixed when the order was placed. Never re-resolved.
    pub fn bom(&self) -> Option<BomId> {
        self.bom
    }

    pub fn requested_quantity(&self) -> i64 {
        self.requested_quantity
    }

    pub fn produced_quantity(&self) -> i64 {
        self.produced_quantity
    }

    pub fn status(&self) -> ProductionStatus {
        self.status
    }

    pub fn planned_start(&self) -> Option<DateTime<Utc>> {
        self.planned_start
    }

    pub fn estimated_end(&self) -> Option<DateTime<Utc>> {
        self.estimated_end
    }

    pub fn completion(&self) -> Option<&CompletionRecord> {
        self.completion.as_ref()
    }
}

impl AggregateRoot for ProductionOrder {
    type Id = ProductionOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: ProductionOrderId,
    pub number: OrderNumber,
    pub finished_good: ItemId,
    pub bom: Option<BomId>,
    pub requested_quantity: i64,
    pub planned_start: Option<DateTime<Utc>>,
    pub estimated_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RescheduleOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleOrder {
    pub order_id: ProductionOrderId,
    pub planned_start: Option<DateTime<Utc>>,
    pub estimated_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: a plain lifecycle transition (start, suspend, resume, cancel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub order_id: ProductionOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteOrder. Issued only after the ledger transaction committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub order_id: ProductionOrderId,
    pub record: CompletionRecord,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionCommand {
    PlaceOrder(PlaceOrder),
    StartOrder(Transition),
    SuspendOrder(Transition),
    ResumeOrder(Transition),
    CancelOrder(Transition),
    RescheduleOrder(RescheduleOrder),
    CompleteOrder(CompleteOrder),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: ProductionOrderId,
    pub number: OrderNumber,
    pub finished_good: ItemId,
    pub bom: Option<BomId>,
    pub requested_quantity: i64,
    pub planned_start: Option<DateTime<Utc>>,
    pub estimated_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a lifecycle transition with an optional free-text reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTransitioned {
    pub order_id: ProductionOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderRescheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRescheduled {
    pub order_id: ProductionOrderId,
    pub planned_start: Option<DateTime<Utc>>,
    pub estimated_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCompleted.
///
/// `produced_quantity` is recorded separately from the requested quantity so
/// partial output can be expressed later without a schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: ProductionOrderId,
    pub produced_quantity: i64,
    pub record: CompletionRecord,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionEvent {
    OrderPlaced(OrderPlaced),
    OrderStarted(OrderTransitioned),
    OrderSuspended(OrderTransitioned),
    OrderResumed(OrderTransitioned),
    OrderCancelled(OrderTransitioned),
    OrderRescheduled(OrderRescheduled),
    OrderCompleted(OrderCompleted),
}

impl ProductionEvent {
    pub fn order_id(&self) -> ProductionOrderId {
        match self {
            ProductionEvent::OrderPlaced(e) => e.order_id,
            ProductionEvent::OrderStarted(e)
            | ProductionEvent::OrderSuspended(e)
            | ProductionEvent::OrderResumed(e)
            | ProductionEvent::OrderCancelled(e) => e.order_id,
            ProductionEvent::OrderRescheduled(e) => e.order_id,
            ProductionEvent::OrderCompleted(e) => e.order_id,
        }
    }
}

impl Event for ProductionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductionEvent::OrderPlaced(_) => "production.order.placed",
            ProductionEvent::OrderStarted(_) => "production.order.started",
            ProductionEvent::OrderSuspended(_) => "production.order.suspended",
            ProductionEvent::OrderResumed(_) => "production.order.resumed",
            ProductionEvent::OrderCancelled(_) => "production.order.cancelled",
            ProductionEvent::OrderRescheduled(_) => "production.order.rescheduled",
            ProductionEvent::OrderCompleted(_) => "production.order.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductionEvent::OrderPlaced(e) => e.occurred_at,
            ProductionEvent::OrderStarted(e)
            | ProductionEvent::OrderSuspended(e)
            | ProductionEvent::OrderResumed(e)
            | ProductionEvent::OrderCancelled(e) => e.occurred_at,
            ProductionEvent::OrderRescheduled(e) => e.occurred_at,
            ProductionEvent::OrderCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductionOrder {
    type Command = ProductionCommand;
    type Event = ProductionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductionEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.number = Some(e.number.clone());
                self.finished_good = Some(e.finished_good);
                self.bom = e.bom;
                self.requested_quantity = e.requested_quantity;
                self.produced_quantity = 0;
                self.status = ProductionStatus::Planned;
                self.planned_start = e.planned_start;
                self.estimated_end = e.estimated_end;
                self.created = true;
            }
            ProductionEvent::OrderStarted(_) | ProductionEvent::OrderResumed(_) => {
                self.status = ProductionStatus::InProgress;
            }
            ProductionEvent::OrderSuspended(_) => {
                self.status = ProductionStatus::Suspended;
            }
            ProductionEvent::OrderCancelled(_) => {
                self.status = ProductionStatus::Cancelled;
            }
            ProductionEvent::OrderRescheduled(e) => {
                self.planned_start = e.planned_start;
                self.estimated_end = e.estimated_end;
            }
            ProductionEvent::OrderCompleted(e) => {
                self.status = ProductionStatus::Completed;
                self.produced_quantity = e.produced_quantity;
                self.completion = Some(e.record.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductionCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            ProductionCommand::StartOrder(cmd) => self
                .transition(cmd, &[ProductionStatus::Planned], "start")
                .map(|e| vec![ProductionEvent::OrderStarted(e)]),
            ProductionCommand::SuspendOrder(cmd) => self
                .transition(cmd, &[ProductionStatus::InProgress], "suspend")
                .map(|e| vec![ProductionEvent::OrderSuspended(e)]),
            ProductionCommand::ResumeOrder(cmd) => self
                .transition(cmd, &[ProductionStatus::Suspended], "resume")
                .map(|e| vec![ProductionEvent::OrderResumed(e)]),
            ProductionCommand::CancelOrder(cmd) => self
                .transition(
                    cmd,
                    &[ProductionStatus::Planned, ProductionStatus::InProgress],
                    "cancel",
                )
                .map(|e| vec![ProductionEvent::OrderCancelled(e)]),
            ProductionCommand::RescheduleOrder(cmd) => self.handle_reschedule(cmd),
            ProductionCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
        }
    }
}

impl ProductionOrder {
    fn ensure_exists(&self, order_id: ProductionOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("production order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, allowed: &[ProductionStatus], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(DomainError::invalid_state(format!(
            "cannot {action} an order that is {}",
            self.status.as_str()
        )))
    }

    fn transition(
        &self,
        cmd: &Transition,
        allowed: &[ProductionStatus],
        action: &str,
    ) -> Result<OrderTransitioned, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_status(allowed, action)?;
        Ok(OrderTransitioned {
            order_id: cmd.order_id,
            reason: cmd
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            occurred_at: cmd.occurred_at,
        })
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<ProductionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("production order already exists"));
        }
        if cmd.requested_quantity <= 0 {
            return Err(DomainError::validation("requested quantity must be positive"));
        }
        validate_schedule(cmd.planned_start, cmd.estimated_end)?;

        Ok(vec![ProductionEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            number: cmd.number.clone(),
            finished_good: cmd.finished_good,
            bom: cmd.bom,
            requested_quantity: cmd.requested_quantity,
            planned_start: cmd.planned_start,
            estimated_end: cmd.estimated_end,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reschedule(&self, cmd: &RescheduleOrder) -> Result<Vec<ProductionEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "cannot reschedule an order that is {}",
                self.status.as_str()
            )));
        }
        validate_schedule(cmd.planned_start, cmd.estimated_end)?;

        Ok(vec![ProductionEvent::OrderRescheduled(OrderRescheduled {
            order_id: cmd.order_id,
            planned_start: cmd.planned_start,
            estimated_end: cmd.estimated_end,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteOrder) -> Result<Vec<ProductionEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_status(&[ProductionStatus::InProgress], "complete")?;

        if cmd.record.produced_quantity != self.requested_quantity {
            return Err(DomainError::invariant(format!(
                "completion must produce the requested quantity {} (got {})",
                self.requested_quantity, cmd.record.produced_quantity
            )));
        }

        Ok(vec![ProductionEvent::OrderCompleted(OrderCompleted {
            order_id: cmd.order_id,
            produced_quantity: cmd.record.produced_quantity,
            record: cmd.record.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn validate_schedule(
    planned_start: Option<DateTime<Utc>>,
    estimated_end: Option<DateTime<Utc>>,
) -> Result<(), DomainError> {
    if let (Some(start), Some(end)) = (planned_start, estimated_end) {
        if end < start {
            return Err(DomainError::validation("estimated end precedes planned start"));
        }
    }
    Ok(())
}

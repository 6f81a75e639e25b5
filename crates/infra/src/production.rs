//! Production order manager: lifecycle of production orders.
//!
//! Orders are event-sourced `ProductionOrder` aggregates. Every mutation of
//! one order runs under that order's lock from `OrderLocks`, the same table
//! the completion coordinator uses, so a completion can never interleave with
//! a suspend or cancel of the same order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use stockforge_core::{AggregateId, BomId, DomainError, DomainResult, ItemId, ProductionOrderId};
use stockforge_events::{EventBus, EventEnvelope};
use stockforge_production::{
    OrderNumber, PlaceOrder, ProductionCommand, ProductionOrder, RescheduleOrder, Transition,
};

use crate::bom::BomRepository;
use crate::catalog::ItemDirectory;
use crate::command_dispatcher::CommandDispatcher;
use crate::completion::{CompletionCoordinator, CompletionResult};
use crate::event_store::EventStore;
use crate::projections::{PRODUCTION_AGGREGATE_TYPE, ProductionOrderReadModel, ProductionOrders};

/// Per-order mutual exclusion with a bounded wait.
#[derive(Debug)]
pub struct OrderLocks {
    locks: Mutex<HashMap<ProductionOrderId, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl OrderLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// The lock cell for one order. Keep it alive for as long as the guard.
    pub fn handle(&self, order_id: ProductionOrderId) -> Arc<Mutex<()>> {
        self.locks.lock().entry(order_id).or_default().clone()
    }

    pub fn acquire<'a>(&self, handle: &'a Mutex<()>, order_id: ProductionOrderId) -> DomainResult<MutexGuard<'a, ()>> {
        handle.try_lock_for(self.timeout).ok_or_else(|| {
            DomainError::conflict(format!(
                "production order {order_id} is busy (lock not acquired within {}ms)",
                self.timeout.as_millis()
            ))
        })
    }
}

/// Input for `ProductionOrderManager::create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProductionOrder {
    pub number: Option<String>,
    pub finished_good: ItemId,
    pub requested_quantity: i64,
    pub bom: Option<BomId>,
    pub planned_start: Option<DateTime<Utc>>,
    pub estimated_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberSlot {
    Reserved,
    Assigned(ProductionOrderId),
}

pub struct ProductionOrderManager<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    boms: Arc<BomRepository>,
    directory: Arc<dyn ItemDirectory>,
    projections: Arc<ProductionOrders>,
    locks: Arc<OrderLocks>,
    coordinator: Arc<CompletionCoordinator<S, B>>,
    numbers: RwLock<HashMap<OrderNumber, NumberSlot>>,
}

impl<S, B> ProductionOrderManager<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        boms: Arc<BomRepository>,
        directory: Arc<dyn ItemDirectory>,
        projections: Arc<ProductionOrders>,
        locks: Arc<OrderLocks>,
        coordinator: Arc<CompletionCoordinator<S, B>>,
    ) -> Self {
        Self {
            dispatcher,
            boms,
            directory,
            projections,
            locks,
            coordinator,
            numbers: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, input: NewProductionOrder) -> DomainResult<ProductionOrderReadModel> {
        if !self.directory.contains(input.finished_good) {
            return Err(DomainError::not_found(format!("finished good {}", input.finished_good)));
        }

        let bom = match input.bom {
            Some(bom_id) => {
                let bom = self.boms.get(bom_id)?;
                if bom.finished_good() != input.finished_good {
                    return Err(DomainError::validation(format!(
                        "bill of materials {bom_id} does not produce {}",
                        input.finished_good
                    )));
                }
                Some(bom_id)
            }
            None => self.boms.active_bom_for(input.finished_good),
        };

        let number = self.reserve_number(input.number.as_deref())?;
        let order_id = ProductionOrderId::new();

        let placed = self.dispatcher.dispatch(
            order_id.into(),
            PRODUCTION_AGGREGATE_TYPE,
            ProductionCommand::PlaceOrder(PlaceOrder {
                order_id,
                number: number.clone(),
                finished_good: input.finished_good,
                bom,
                requested_quantity: input.requested_quantity,
                planned_start: input.planned_start,
                estimated_end: input.estimated_end,
                occurred_at: Utc::now(),
            }),
            make_order,
        );

        if let Err(err) = placed {
            self.numbers.write().remove(&number);
            return Err(err.into());
        }
        self.numbers.write().insert(number.clone(), NumberSlot::Assigned(order_id));
        info!(%number, order = %order_id, bom = ?bom, "production order placed");

        self.snapshot(order_id)
    }

    pub fn start(&self, number: &OrderNumber) -> DomainResult<ProductionOrderReadModel> {
        self.transition(number, None, ProductionCommand::StartOrder, false)
    }

    /// Refused once the completion transaction has consumed the components.
    pub fn suspend(&self, number: &OrderNumber, reason: Option<String>) -> DomainResult<ProductionOrderReadModel> {
        self.transition(number, reason, ProductionCommand::SuspendOrder, true)
    }

    pub fn resume(&self, number: &OrderNumber) -> DomainResult<ProductionOrderReadModel> {
        self.transition(number, None, ProductionCommand::ResumeOrder, false)
    }

    /// Refused once the completion transaction has consumed the components.
    pub fn cancel(&self, number: &OrderNumber, reason: Option<String>) -> DomainResult<ProductionOrderReadModel> {
        self.transition(number, reason, ProductionCommand::CancelOrder, true)
    }

    pub fn reschedule(
        &self,
        number: &OrderNumber,
        planned_start: Option<DateTime<Utc>>,
        estimated_end: Option<DateTime<Utc>>,
    ) -> DomainResult<ProductionOrderReadModel> {
        let order_id = self.resolve(number)?;
        let handle = self.locks.handle(order_id);
        let _guard = self.locks.acquire(&handle, order_id)?;

        self.dispatcher
            .dispatch(
                order_id.into(),
                PRODUCTION_AGGREGATE_TYPE,
                ProductionCommand::RescheduleOrder(RescheduleOrder {
                    order_id,
                    planned_start,
                    estimated_end,
                    occurred_at: Utc::now(),
                }),
                make_order,
            )
            .map_err(DomainError::from)?;
        self.snapshot(order_id)
    }

    /// Consume components and load the finished good; see `CompletionCoordinator`.
    pub fn complete(&self, number: &OrderNumber) -> DomainResult<CompletionResult> {
        let order_id = self.resolve(number)?;
        self.coordinator.complete(order_id)
    }

    /// Order as seen by the projection, or rehydrated when the projection lags.
    pub fn get(&self, number: &OrderNumber) -> DomainResult<ProductionOrderReadModel> {
        let order_id = self.resolve(number)?;
        match self.projections.get(&order_id) {
            Some(rm) => Ok(rm),
            None => self.snapshot(order_id),
        }
    }

    /// All orders from the projection, sorted by number.
    pub fn list(&self) -> Vec<ProductionOrderReadModel> {
        self.projections.list()
    }

    pub fn resolve(&self, number: &OrderNumber) -> DomainResult<ProductionOrderId> {
        match self.numbers.read().get(number) {
            Some(NumberSlot::Assigned(id)) => Ok(*id),
            _ => Err(DomainError::not_found(format!("production order {number}"))),
        }
    }

    fn transition(
        &self,
        number: &OrderNumber,
        reason: Option<String>,
        make: fn(Transition) -> ProductionCommand,
        refuse_after_consumption: bool,
    ) -> DomainResult<ProductionOrderReadModel> {
        let order_id = self.resolve(number)?;
        let handle = self.locks.handle(order_id);
        let _guard = self.locks.acquire(&handle, order_id)?;

        if refuse_after_consumption && self.coordinator.committed_movements(order_id).is_some() {
            warn!(%number, order = %order_id, "transition refused: components already consumed");
            return Err(DomainError::invalid_state(format!(
                "production order {number} already consumed its components and can only be completed"
            )));
        }

        self.dispatcher
            .dispatch(
                order_id.into(),
                PRODUCTION_AGGREGATE_TYPE,
                make(Transition {
                    order_id,
                    reason,
                    occurred_at: Utc::now(),
                }),
                make_order,
            )
            .map_err(DomainError::from)?;
        self.snapshot(order_id)
    }

    fn snapshot(&self, order_id: ProductionOrderId) -> DomainResult<ProductionOrderReadModel> {
        let order: ProductionOrder = self.dispatcher.load(order_id.into(), make_order)?;
        ProductionOrderReadModel::from_aggregate(&order)
            .ok_or_else(|| DomainError::not_found(format!("production order {order_id}")))
    }

    fn reserve_number(&self, raw: Option<&str>) -> DomainResult<OrderNumber> {
        let mut numbers = self.numbers.write();
        let number = match raw.map(str::trim).filter(|n| !n.is_empty()) {
            Some(raw) => {
                let number = OrderNumber::parse(raw)?;
                if numbers.contains_key(&number) {
                    return Err(DomainError::duplicate_code(number.to_string()));
                }
                number
            }
            None => OrderNumber::next_in(numbers.keys()),
        };
        numbers.insert(number.clone(), NumberSlot::Reserved);
        Ok(number)
    }
}

pub(crate) fn make_order(id: AggregateId) -> ProductionOrder {
    ProductionOrder::empty(ProductionOrderId::from_uuid(*id.as_uuid()))
}

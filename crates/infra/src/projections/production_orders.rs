use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockforge_core::{BomId, ItemId, ProductionOrderId};
use stockforge_events::EventEnvelope;
use stockforge_production::{CompletionRecord, OrderNumber, ProductionEvent, ProductionOrder, ProductionStatus};

use super::ProjectionError;
use super::cursors::StreamCursors;
use crate::read_model::ReadStore;

pub const PRODUCTION_AGGREGATE_TYPE: &str = "production.order";

/// Queryable production order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionOrderReadModel {
    pub order_id: ProductionOrderId,
    pub number: OrderNumber,
    pub finished_good: ItemId,
    pub bom: Option<BomId>,
    pub requested_quantity: i64,
    pub produced_quantity: i64,
    pub status: ProductionStatus,
    pub planned_start: Option<DateTime<Utc>>,
    pub estimated_end: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion: Option<CompletionRecord>,
}

impl ProductionOrderReadModel {
    /// Snapshot a rehydrated aggregate. `None` for an order that was never placed.
    pub fn from_aggregate(order: &ProductionOrder) -> Option<Self> {
        Some(Self {
            order_id: order.id_typed(),
            number: order.number()?.clone(),
            finished_good: order.finished_good()?,
            bom: order.bom(),
            requested_quantity: order.requested_quantity(),
            produced_quantity: order.produced_quantity(),
            status: order.status(),
            planned_start: order.planned_start(),
            estimated_end: order.estimated_end(),
            completed_at: order.completion().map(|c| c.completed_at),
            completion: order.completion().cloned(),
        })
    }
}

/// Production order projection.
///
/// Feeds `ProductionOrderManager::list` and the reservation aggregator's
/// view of open production demand.
#[derive(Debug)]
pub struct ProductionOrdersProjection<S>
where
    S: ReadStore<ProductionOrderId, ProductionOrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductionOrdersProjection<S>
where
    S: ReadStore<ProductionOrderId, ProductionOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, order_id: &ProductionOrderId) -> Option<ProductionOrderReadModel> {
        self.store.get(order_id)
    }

    /// All orders sorted by number.
    pub fn list(&self) -> Vec<ProductionOrderReadModel> {
        let mut orders = self.store.list();
        orders.sort_by(|a, b| a.number.cmp(&b.number));
        orders
    }

    /// Orders that still represent demand or supply (not completed, not cancelled).
    pub fn open_orders(&self) -> Vec<ProductionOrderReadModel> {
        self.store.list().into_iter().filter(|o| !o.status.is_terminal()).collect()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != PRODUCTION_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        self.cursors.advance(aggregate_id, envelope.sequence_number(), || {
            let event: ProductionEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

            let order_id = event.order_id();
            if order_id.as_uuid() != aggregate_id.as_uuid() {
                return Err(ProjectionError::StreamMismatch(
                    "event order_id does not match envelope aggregate_id".to_string(),
                ));
            }

            if let ProductionEvent::OrderPlaced(e) = &event {
                self.store.upsert(
                    order_id,
                    ProductionOrderReadModel {
                        order_id,
                        number: e.number.clone(),
                        finished_good: e.finished_good,
                        bom: e.bom,
                        requested_quantity: e.requested_quantity,
                        produced_quantity: 0,
                        status: ProductionStatus::Planned,
                        planned_start: e.planned_start,
                        estimated_end: e.estimated_end,
                        completed_at: None,
                        completion: None,
                    },
                );
                return Ok(());
            }

            let mut rm = self
                .store
                .get(&order_id)
                .ok_or_else(|| ProjectionError::StreamMismatch(format!("order {order_id} has no placed event")))?;

            match event {
                ProductionEvent::OrderPlaced(_) => {}
                ProductionEvent::OrderStarted(_) | ProductionEvent::OrderResumed(_) => {
                    rm.status = ProductionStatus::InProgress;
                }
                ProductionEvent::OrderSuspended(_) => rm.status = ProductionStatus::Suspended,
                ProductionEvent::OrderCancelled(_) => rm.status = ProductionStatus::Cancelled,
                ProductionEvent::OrderRescheduled(e) => {
                    rm.planned_start = e.planned_start;
                    rm.estimated_end = e.estimated_end;
                }
                ProductionEvent::OrderCompleted(e) => {
                    rm.status = ProductionStatus::Completed;
                    rm.produced_quantity = e.produced_quantity;
                    rm.completed_at = Some(e.record.completed_at);
                    rm.completion = Some(e.record);
                }
            }

            self.store.upsert(order_id, rm);
            Ok(())
        })
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear();
        self.store.clear();
        super::replay_sorted(envelopes, |env| self.apply_envelope(env))
    }
}

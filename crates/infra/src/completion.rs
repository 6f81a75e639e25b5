//! Completion transaction coordinator.
//!
//! Turns an in-progress production order into one multi-item ledger
//! transaction (component unloads plus the finished-good load) and only then
//! marks the order completed.
//!
//! ```text
//! lock order → load → resolve BOM → stage drafts
//!   ↓
//! ledger.commit(drafts, key = order id)      (all or nothing, Conflict retried)
//!   ↓
//! dispatch CompleteOrder(record)             (retried; a later call re-commits
//!                                             under the same key and gets the
//!                                             original movements back)
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use stockforge_core::{DomainError, DomainResult, ProductionOrderId, TransactionId};
use stockforge_events::{EventBus, EventEnvelope};
use stockforge_inventory::{Movement, MovementCause, MovementDraft, MovementKind};
use stockforge_production::{
    CompleteOrder, CompletionRecord, CompletionWarning, ProductionCommand, ProductionOrder, ProductionStatus,
    consumption_for,
};

use crate::bom::BomRepository;
use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::EventStore;
use crate::ledger::MovementLedger;
use crate::production::{OrderLocks, make_order};
use crate::projections::{PRODUCTION_AGGREGATE_TYPE, ProductionOrderReadModel};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub order: ProductionOrderReadModel,
    pub produced_quantity: i64,
    pub movements: Vec<Movement>,
    pub transaction: TransactionId,
    pub warnings: Vec<CompletionWarning>,
    /// True when the order was already completed and nothing was written.
    pub replayed: bool,
}

#[derive(Debug)]
pub struct CompletionCoordinator<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    ledger: Arc<MovementLedger<B>>,
    boms: Arc<BomRepository>,
    locks: Arc<OrderLocks>,
    retry: RetryPolicy,
}

impl<S, B> CompletionCoordinator<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        ledger: Arc<MovementLedger<B>>,
        boms: Arc<BomRepository>,
        locks: Arc<OrderLocks>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            ledger,
            boms,
            locks,
            retry,
        }
    }

    /// Idempotency key of an order's completion transaction.
    pub fn transaction_key(order_id: ProductionOrderId) -> TransactionId {
        TransactionId::from_uuid(*order_id.as_uuid())
    }

    /// Movements of the order's completion transaction, once it has committed.
    pub fn committed_movements(&self, order_id: ProductionOrderId) -> Option<Vec<Movement>> {
        self.ledger.transaction(Self::transaction_key(order_id))
    }

    #[instrument(skip_all, fields(order = %order_id))]
    pub fn complete(&self, order_id: ProductionOrderId) -> DomainResult<CompletionResult> {
        let handle = self.locks.handle(order_id);
        let _guard = self.locks.acquire(&handle, order_id)?;

        let order = self.load(order_id)?;
        if order.status() == ProductionStatus::Completed {
            return self.replay_completed(&order);
        }
        if order.status() != ProductionStatus::InProgress {
            return Err(DomainError::invalid_state(format!(
                "cannot complete an order that is {}",
                order.status().as_str()
            )));
        }

        let finished_good = order
            .finished_good()
            .ok_or_else(|| DomainError::invariant("placed order has no finished good"))?;
        let requested = order.requested_quantity();
        let label = order.number().map(|n| n.to_string()).unwrap_or_default();

        let mut warnings = Vec::new();
        let mut drafts = Vec::new();

        if let Some(bom_id) = order.bom() {
            let components = self.boms.resolve(bom_id).inspect_err(|_| {
                warn!(order = %label, bom = %bom_id, "order references a BOM that no longer exists");
            })?;

            let (own, consumed): (Vec<_>, Vec<_>) =
                components.into_iter().partition(|c| c.component == finished_good);
            if !own.is_empty() {
                warn!(order = %label, item = %finished_good, "BOM lists the finished good as a component; skipped");
                warnings.push(CompletionWarning::SelfReferencingComponent { item: finished_good });
            }

            for (component, quantity) in consumption_for(&consumed, requested)? {
                drafts.push(
                    MovementDraft::new(component, MovementKind::Unload, quantity, MovementCause::InternalConsumption)
                        .with_note(label.clone()),
                );
            }
        }

        drafts.push(
            MovementDraft::new(finished_good, MovementKind::Load, requested, MovementCause::ProductionOutput)
                .with_note(label.clone()),
        );

        let transaction = Self::transaction_key(order_id);
        let movements = self.ledger.commit_with_retry(&drafts, Some(transaction))?;

        for m in movements.iter().filter(|m| m.kind == MovementKind::Unload && m.left_negative()) {
            warnings.push(CompletionWarning::NegativeStock {
                item: m.item_id,
                resulting: m.resulting,
            });
        }

        let record = CompletionRecord {
            transaction,
            produced_quantity: requested,
            movements: movements.iter().map(|m| m.id).collect(),
            warnings: warnings.clone(),
            completed_at: Utc::now(),
        };

        self.retry.run(|_| {
            self.dispatcher
                .dispatch(
                    order_id.into(),
                    PRODUCTION_AGGREGATE_TYPE,
                    ProductionCommand::CompleteOrder(CompleteOrder {
                        order_id,
                        record: record.clone(),
                        occurred_at: record.completed_at,
                    }),
                    make_order,
                )
                .map_err(DomainError::from)
        })?;

        info!(order = %label, movements = movements.len(), warnings = warnings.len(), "production order completed");

        Ok(CompletionResult {
            order: self.snapshot(order_id)?,
            produced_quantity: requested,
            movements,
            transaction,
            warnings,
            replayed: false,
        })
    }

    fn replay_completed(&self, order: &ProductionOrder) -> DomainResult<CompletionResult> {
        let record = order
            .completion()
            .ok_or_else(|| DomainError::invariant("completed order has no completion record"))?;
        let movements = self.ledger.transaction(record.transaction).unwrap_or_default();
        let view = ProductionOrderReadModel::from_aggregate(order)
            .ok_or_else(|| DomainError::invariant("completed order was never placed"))?;

        Ok(CompletionResult {
            order: view,
            produced_quantity: record.produced_quantity,
            movements,
            transaction: record.transaction,
            warnings: record.warnings.clone(),
            replayed: true,
        })
    }

    fn load(&self, order_id: ProductionOrderId) -> DomainResult<ProductionOrder> {
        let order: ProductionOrder = self.dispatcher.load(order_id.into(), make_order)?;
        if !order.is_created() {
            return Err(DomainError::not_found(format!("production order {order_id}")));
        }
        Ok(order)
    }

    fn snapshot(&self, order_id: ProductionOrderId) -> DomainResult<ProductionOrderReadModel> {
        let order = self.load(order_id)?;
        ProductionOrderReadModel::from_aggregate(&order)
            .ok_or_else(|| DomainError::not_found(format!("production order {order_id}")))
    }
}

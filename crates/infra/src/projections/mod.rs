//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimized read
//! models. All of them are:
//! - **Rebuildable**: can be reconstructed from the event store / journal
//! - **Idempotent**: safe for at-least-once delivery (per-stream cursors)
//! - **Disposable**: read stores may be cleared at any time

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockforge_core::{ItemId, ProductionOrderId};
use stockforge_events::EventEnvelope;

use crate::read_model::InMemoryReadStore;

pub mod cursors;
pub mod production_orders;
pub mod stock_levels;

pub use production_orders::{PRODUCTION_AGGREGATE_TYPE, ProductionOrderReadModel, ProductionOrdersProjection};
pub use stock_levels::{StockLevel, StockLevelsProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("stream mismatch: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

pub type StockLevels = StockLevelsProjection<Arc<InMemoryReadStore<ItemId, StockLevel>>>;
pub type ProductionOrders =
    ProductionOrdersProjection<Arc<InMemoryReadStore<ProductionOrderId, ProductionOrderReadModel>>>;

/// The read side one process keeps, routed by aggregate type.
#[derive(Debug, Clone)]
pub struct ProjectionSet {
    pub stock_levels: Arc<StockLevels>,
    pub production_orders: Arc<ProductionOrders>,
}

impl Default for ProjectionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionSet {
    pub fn new() -> Self {
        Self {
            stock_levels: Arc::new(StockLevelsProjection::new(Arc::new(InMemoryReadStore::new()))),
            production_orders: Arc::new(ProductionOrdersProjection::new(Arc::new(InMemoryReadStore::new()))),
        }
    }

    /// Hand an envelope to every projection; each ignores foreign aggregate types.
    pub fn route(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.stock_levels.apply_envelope(envelope)?;
        self.production_orders.apply_envelope(envelope)
    }
}

/// Deterministic replay order: aggregate, then sequence.
fn replay_sorted(
    envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    mut apply: impl FnMut(&EventEnvelope<JsonValue>) -> Result<(), ProjectionError>,
) -> Result<(), ProjectionError> {
    let mut envs: Vec<_> = envelopes.into_iter().collect();
    envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));
    for env in &envs {
        apply(env)?;
    }
    Ok(())
}

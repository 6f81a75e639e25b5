use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockforge_core::ItemId;
use stockforge_events::EventEnvelope;
use stockforge_inventory::StockEvent;

use super::ProjectionError;
use super::cursors::StreamCursors;
use crate::ledger::STOCK_AGGREGATE_TYPE;
use crate::read_model::ReadStore;

/// Published on-hand per item, as last seen on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub item_id: ItemId,
    pub on_hand: i64,
    pub last_sequence: u64,
    pub last_movement_at: DateTime<Utc>,
}

/// Stock level projection.
///
/// Consumes `inventory.stock` envelopes published by the movement ledger.
/// Each movement carries its `resulting` quantity, so the projection just
/// follows the latest one per item. Lags the ledger by bus latency.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: ReadStore<ItemId, StockLevel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockLevelsProjection<S>
where
    S: ReadStore<ItemId, StockLevel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, item_id: &ItemId) -> Option<StockLevel> {
        self.store.get(item_id)
    }

    /// Published on-hand, 0 for an item that has never moved.
    pub fn on_hand(&self, item_id: &ItemId) -> i64 {
        self.get(item_id).map(|l| l.on_hand).unwrap_or(0)
    }

    pub fn list(&self) -> Vec<StockLevel> {
        self.store.list()
    }

    /// Apply a published envelope. Envelopes of other aggregate types are ignored.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != STOCK_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        self.cursors.advance(aggregate_id, envelope.sequence_number(), || {
            let event: StockEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
            let StockEvent::MovementRecorded(m) = event;

            if m.item_id.as_uuid() != aggregate_id.as_uuid() {
                return Err(ProjectionError::StreamMismatch(
                    "movement item_id does not match envelope aggregate_id".to_string(),
                ));
            }

            self.store.upsert(
                m.item_id,
                StockLevel {
                    item_id: m.item_id,
                    on_hand: m.resulting,
                    last_sequence: m.sequence,
                    last_movement_at: m.recorded_at,
                },
            );
            Ok(())
        })
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear();
        self.store.clear();
        super::replay_sorted(envelopes, |env| self.apply_envelope(env))
    }
}

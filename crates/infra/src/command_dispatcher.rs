//! Command execution pipeline (application-level orchestration).
//!
//! The `CommandDispatcher` runs every event-sourced command the same way:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (for projections)
//! ```
//!
//! Catalog items and production orders both go through here. The movement
//! ledger does not: it has its own row-locked journal.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use stockforge_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use stockforge_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    Concurrency(String),
    /// The aggregate rejected the command.
    Domain(DomainError),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to or loading from the event store failed.
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Domain(other),
        }
    }
}

impl From<DispatchError> for DomainError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => DomainError::conflict(msg),
            DispatchError::Domain(err) => err,
            DispatchError::Deserialize(msg) => {
                DomainError::invariant(format!("stored event could not be decoded: {msg}"))
            }
            DispatchError::Store(err) => DomainError::invariant(err.to_string()),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - Events are persisted before publication; if append fails nothing is published.
/// - A version mismatch surfaces as `DispatchError::Concurrency`. Callers
///   either retry (reload and re-run) or report a conflict.
/// - Publication is at-least-once. A failed publish is logged, not returned:
///   the store already holds the events and projections rebuild from it.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `make_aggregate` builds the empty instance (e.g. `CatalogItem::empty(id)`)
    /// that history is applied to. Returns the committed events with their
    /// assigned sequence numbers; an empty vector when the command decided
    /// nothing.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockforge_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type.clone(), Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    aggregate_id = %aggregate_id,
                    event_type = %stored.event_type,
                    error = ?err,
                    "event publication failed after append"
                );
            }
        }

        Ok(committed)
    }

    /// Rehydrate an aggregate from its stream without dispatching anything.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    // A buggy backend must not mix streams or reorder them.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    use stockforge_core::{AggregateRoot, ItemId};
    use stockforge_events::InMemoryEventBus;
    use stockforge_inventory::{CatalogCommand, CatalogItem, CreateItem, DeleteItem, ItemCode};

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn setup() -> (Dispatcher, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>) {
        let bus = Arc::new(InMemoryEventBus::new());
        (CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), bus.clone()), bus)
    }

    fn create(item_id: ItemId) -> CatalogCommand {
        CatalogCommand::CreateItem(CreateItem {
            item_id,
            code: ItemCode::new("MAT", 1).unwrap(),
            name: "Steel bar".to_string(),
            unit: "kg".to_string(),
            min_stock: 20,
            occurred_at: Utc::now(),
        })
    }

    fn make(id: AggregateId) -> CatalogItem {
        CatalogItem::empty(ItemId::from_uuid(*id.as_uuid()))
    }

    #[test]
    fn dispatch_persists_then_publishes() {
        let (dispatcher, bus) = setup();
        let sub = bus.subscribe();
        let item_id = ItemId::new();

        let committed = dispatcher
            .dispatch(item_id.into(), "catalog.item", create(item_id), make)
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);

        let published = sub.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].sequence_number(), 1);
    }

    #[test]
    fn rejected_command_writes_nothing() {
        let (dispatcher, bus) = setup();
        let sub = bus.subscribe();
        let item_id = ItemId::new();

        let err = dispatcher
            .dispatch(
                item_id.into(),
                "catalog.item",
                CatalogCommand::DeleteItem(DeleteItem {
                    item_id,
                    occurred_at: Utc::now(),
                }),
                make,
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::NotFound(_))));
        assert!(dispatcher.store().load_stream(item_id.into()).unwrap().is_empty());
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn load_rehydrates_version() {
        let (dispatcher, _bus) = setup();
        let item_id = ItemId::new();
        dispatcher
            .dispatch(item_id.into(), "catalog.item", create(item_id), make)
            .unwrap();

        let item: CatalogItem = dispatcher.load(item_id.into(), make).unwrap();
        assert_eq!(item.version(), 1);
        assert!(item.is_created());
    }

    #[test]
    fn dispatch_errors_map_back_to_domain_errors() {
        let conflict: DomainError = DispatchError::Concurrency("stale".into()).into();
        assert!(conflict.is_retriable());

        let nf: DomainError = DispatchError::Domain(DomainError::not_found("x")).into();
        assert!(matches!(nf, DomainError::NotFound(_)));
    }
}

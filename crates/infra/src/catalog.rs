//! Catalog item store: item identity, codes and metadata.
//!
//! Metadata is an event-sourced `CatalogItem` dispatched through the
//! `CommandDispatcher`. On-hand quantity is never stored here; views read it
//! from the movement ledger.
//!
//! The code index is the authority for code uniqueness. A code is reserved in
//! the index before the create event is written and released again if the
//! write fails, so a failed create never burns a code.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use stockforge_core::{AggregateId, DomainError, DomainResult, ItemId};
use stockforge_events::{EventBus, EventEnvelope};
use stockforge_inventory::{CatalogCommand, CatalogItem, CreateItem, DeleteItem, ItemCode, ItemPatch, UpdateItem};

use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::EventStore;
use crate::ledger::MovementLedger;

pub const CATALOG_AGGREGATE_TYPE: &str = "catalog.item";

/// Read access to catalog identities for collaborators (BOM resolver, reservations).
pub trait ItemDirectory: Send + Sync {
    /// Item id behind a code. Deleted items still resolve.
    fn resolve_code(&self, code: &ItemCode) -> DomainResult<ItemId>;

    fn code_of(&self, item_id: ItemId) -> Option<ItemCode>;

    fn contains(&self, item_id: ItemId) -> bool {
        self.code_of(item_id).is_some()
    }

    /// Minimum-stock threshold of a live or deleted item.
    fn min_stock(&self, item_id: ItemId) -> DomainResult<i64>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItemView {
    pub id: ItemId,
    pub code: ItemCode,
    pub name: String,
    pub unit: String,
    pub min_stock: i64,
    pub on_hand: i64,
    pub deleted: bool,
}

/// Input for `CatalogItemStore::create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    /// Human-assigned code. When omitted a code is generated within `category_prefix`.
    pub code: Option<String>,
    pub category_prefix: Option<String>,
    pub name: String,
    pub unit: String,
    #[serde(default)]
    pub min_stock: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeSlot {
    Reserved,
    Assigned(ItemId),
}

#[derive(Debug)]
pub struct CatalogItemStore<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    ledger: Arc<MovementLedger<B>>,
    codes: RwLock<HashMap<ItemCode, CodeSlot>>,
    ids: RwLock<HashMap<ItemId, ItemCode>>,
}

impl<S, B> CatalogItemStore<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, ledger: Arc<MovementLedger<B>>) -> Self {
        Self {
            dispatcher,
            ledger,
            codes: RwLock::new(HashMap::new()),
            ids: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, input: NewItem) -> DomainResult<CatalogItemView> {
        let code = self.reserve_code(input.code.as_deref(), input.category_prefix.as_deref())?;
        let item_id = ItemId::new();

        let dispatched = self.dispatcher.dispatch(
            item_id.into(),
            CATALOG_AGGREGATE_TYPE,
            CatalogCommand::CreateItem(CreateItem {
                item_id,
                code: code.clone(),
                name: input.name,
                unit: input.unit,
                min_stock: input.min_stock,
                occurred_at: Utc::now(),
            }),
            make_item,
        );

        if let Err(err) = dispatched {
            self.codes.write().remove(&code);
            return Err(err.into());
        }

        self.codes.write().insert(code.clone(), CodeSlot::Assigned(item_id));
        self.ids.write().insert(item_id, code.clone());
        self.ledger.register_item(item_id, code.to_string());
        info!(%code, item = %item_id, "catalog item created");

        self.read(&code)
    }

    /// Peek at the next generated code for `prefix` without reserving it.
    pub fn next_code(&self, prefix: &str) -> DomainResult<ItemCode> {
        let codes = self.codes.read();
        ItemCode::next_in(prefix, codes.keys())
    }

    pub fn read(&self, code: &ItemCode) -> DomainResult<CatalogItemView> {
        let item_id = self.resolve_code(code)?;
        self.view(item_id)
    }

    /// Items sorted by code. Soft-deleted items only when `include_deleted`.
    pub fn list(&self, include_deleted: bool) -> DomainResult<Vec<CatalogItemView>> {
        let mut assigned: Vec<(ItemCode, ItemId)> = self
            .codes
            .read()
            .iter()
            .filter_map(|(code, slot)| match slot {
                CodeSlot::Assigned(id) => Some((code.clone(), *id)),
                CodeSlot::Reserved => None,
            })
            .collect();
        assigned.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = Vec::with_capacity(assigned.len());
        for (_, id) in assigned {
            let view = self.view(id)?;
            if include_deleted || !view.deleted {
                out.push(view);
            }
        }
        Ok(out)
    }

    /// Change metadata. Patches that carry a quantity are refused.
    pub fn update(&self, code: &ItemCode, patch: ItemPatch) -> DomainResult<CatalogItemView> {
        let item_id = self.resolve_code(code)?;
        self.dispatcher
            .dispatch(
                item_id.into(),
                CATALOG_AGGREGATE_TYPE,
                CatalogCommand::UpdateItem(UpdateItem {
                    item_id,
                    patch,
                    occurred_at: Utc::now(),
                }),
                make_item,
            )
            .map_err(DomainError::from)?;
        self.view(item_id)
    }

    /// Soft delete. The code stays taken and the history stays readable.
    ///
    /// The ledger row is retired before `ItemDeleted` is written, so a lock
    /// timeout leaves the item untouched and the call can simply be retried.
    pub fn delete(&self, code: &ItemCode) -> DomainResult<CatalogItemView> {
        let item_id = self.resolve_code(code)?;
        if self.load(item_id)?.is_deleted() {
            // Re-retire in case an earlier delete left the row open.
            self.ledger.retire_item(item_id)?;
            return Err(DomainError::invalid_state(format!("item {code} is deleted")));
        }

        self.ledger.retire_item(item_id)?;
        let dispatched = self.dispatcher.dispatch(
            item_id.into(),
            CATALOG_AGGREGATE_TYPE,
            CatalogCommand::DeleteItem(DeleteItem {
                item_id,
                occurred_at: Utc::now(),
            }),
            make_item,
        );

        if let Err(err) = dispatched {
            let still_live = self.load(item_id).is_ok_and(|item| !item.is_deleted());
            if still_live {
                if let Err(restore) = self.ledger.restore_item(item_id) {
                    warn!(%code, item = %item_id, error = %restore, "ledger row left retired after failed delete");
                }
            }
            return Err(err.into());
        }

        info!(%code, item = %item_id, "catalog item deleted");
        self.view(item_id)
    }

    /// Parse a user-supplied code and return its item id.
    pub fn resolve(&self, raw_code: &str) -> DomainResult<(ItemCode, ItemId)> {
        let code = ItemCode::from_str(raw_code)?;
        let id = self.resolve_code(&code)?;
        Ok((code, id))
    }

    fn load(&self, item_id: ItemId) -> DomainResult<CatalogItem> {
        let item: CatalogItem = self.dispatcher.load(item_id.into(), make_item)?;
        if !item.is_created() {
            warn!(item = %item_id, "code index points at an item with no stream");
            return Err(DomainError::not_found(format!("item {item_id}")));
        }
        Ok(item)
    }

    fn view(&self, item_id: ItemId) -> DomainResult<CatalogItemView> {
        let item = self.load(item_id)?;
        let code = item
            .code()
            .cloned()
            .ok_or_else(|| DomainError::invariant(format!("item {item_id} has no code")))?;
        let on_hand = self.ledger.on_hand(item_id)?;
        Ok(CatalogItemView {
            id: item_id,
            code,
            name: item.name().to_string(),
            unit: item.unit().to_string(),
            min_stock: item.min_stock(),
            on_hand,
            deleted: item.is_deleted(),
        })
    }

    fn reserve_code(&self, code: Option<&str>, prefix: Option<&str>) -> DomainResult<ItemCode> {
        let explicit = code.map(str::trim).filter(|c| !c.is_empty());
        let mut codes = self.codes.write();

        let code = match (explicit, prefix) {
            (Some(raw), _) => {
                let code = ItemCode::from_str(raw)?;
                if codes.contains_key(&code) {
                    return Err(DomainError::duplicate_code(code.to_string()));
                }
                code
            }
            (None, Some(prefix)) => ItemCode::next_in(prefix, codes.keys())?,
            (None, None) => {
                return Err(DomainError::validation(
                    "either a code or a category prefix is required",
                ));
            }
        };

        codes.insert(code.clone(), CodeSlot::Reserved);
        Ok(code)
    }
}

impl<S, B> ItemDirectory for CatalogItemStore<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn resolve_code(&self, code: &ItemCode) -> DomainResult<ItemId> {
        match self.codes.read().get(code) {
            Some(CodeSlot::Assigned(id)) => Ok(*id),
            _ => Err(DomainError::not_found(format!("item {code}"))),
        }
    }

    fn code_of(&self, item_id: ItemId) -> Option<ItemCode> {
        self.ids.read().get(&item_id).cloned()
    }

    fn min_stock(&self, item_id: ItemId) -> DomainResult<i64> {
        Ok(self.load(item_id)?.min_stock())
    }
}

fn make_item(id: AggregateId) -> CatalogItem {
    CatalogItem::empty(ItemId::from_uuid(*id.as_uuid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stockforge_events::InMemoryEventBus;
    use stockforge_inventory::{MovementCause, MovementKind};

    use crate::event_store::InMemoryEventStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Store = CatalogItemStore<Arc<InMemoryEventStore>, Bus>;

    fn setup() -> (Store, Arc<MovementLedger<Bus>>) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), bus.clone()));
        let ledger = Arc::new(MovementLedger::new(bus).with_lock_timeout(Duration::from_millis(20)));
        (CatalogItemStore::new(dispatcher, ledger.clone()), ledger)
    }

    fn new_item(code: Option<&str>, prefix: Option<&str>, name: &str) -> NewItem {
        NewItem {
            code: code.map(str::to_string),
            category_prefix: prefix.map(str::to_string),
            name: name.to_string(),
            unit: "pcs".to_string(),
            min_stock: 5,
        }
    }

    #[test]
    fn generates_codes_per_prefix() {
        let (store, _) = setup();
        assert_eq!(store.next_code("mat").unwrap().to_string(), "MAT-0001");

        let a = store.create(new_item(None, Some("MAT"), "Bolt")).unwrap();
        let b = store.create(new_item(None, Some("MAT"), "Nut")).unwrap();
        let f = store.create(new_item(None, Some("FIN"), "Chair")).unwrap();

        assert_eq!(a.code.to_string(), "MAT-0001");
        assert_eq!(b.code.to_string(), "MAT-0002");
        assert_eq!(f.code.to_string(), "FIN-0001");
        assert_eq!(store.next_code("MAT").unwrap().to_string(), "MAT-0003");
    }

    #[test]
    fn sequence_continues_after_human_codes() {
        let (store, _) = setup();
        store.create(new_item(Some("mat-0007"), None, "Bolt")).unwrap();
        let next = store.create(new_item(None, Some("MAT"), "Nut")).unwrap();
        assert_eq!(next.code.to_string(), "MAT-0008");
    }

    #[test]
    fn duplicate_code_is_rejected() {
        let (store, _) = setup();
        store.create(new_item(Some("MAT-0001"), None, "Bolt")).unwrap();
        let err = store.create(new_item(Some("mat-0001"), None, "Again")).unwrap_err();
        assert!(matches!(err, DomainError::DuplicateCode(_)));
    }

    #[test]
    fn failed_create_does_not_burn_a_code() {
        let (store, _) = setup();
        let err = store.create(new_item(None, Some("MAT"), "   ")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(store.next_code("MAT").unwrap().to_string(), "MAT-0001");
        assert!(store.list(true).unwrap().is_empty());
    }

    #[test]
    fn missing_code_and_prefix_is_a_validation_error() {
        let (store, _) = setup();
        let err = store.create(new_item(None, None, "Bolt")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn quantity_patch_is_refused() {
        let (store, _) = setup();
        let item = store.create(new_item(None, Some("MAT"), "Bolt")).unwrap();
        let err = store
            .update(
                &item.code,
                ItemPatch {
                    on_hand: Some(10),
                    ..ItemPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidOperation(_)));

        let renamed = store
            .update(
                &item.code,
                ItemPatch {
                    name: Some("Hex bolt".into()),
                    ..ItemPatch::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Hex bolt");
    }

    #[test]
    fn read_reports_on_hand_from_ledger() {
        let (store, ledger) = setup();
        let item = store.create(new_item(None, Some("MAT"), "Bolt")).unwrap();
        ledger
            .append(item.id, MovementKind::Load, 12, MovementCause::Purchase, None)
            .unwrap();
        assert_eq!(store.read(&item.code).unwrap().on_hand, 12);
    }

    #[test]
    fn soft_delete_hides_item_and_blocks_movements() {
        let (store, ledger) = setup();
        let item = store.create(new_item(None, Some("MAT"), "Bolt")).unwrap();
        ledger
            .append(item.id, MovementKind::Load, 3, MovementCause::Purchase, None)
            .unwrap();

        assert!(store.delete(&item.code).unwrap().deleted);
        assert!(store.list(false).unwrap().is_empty());
        assert_eq!(store.list(true).unwrap().len(), 1);
        assert_eq!(ledger.movements(item.id).unwrap().len(), 1);

        let err = ledger
            .append(item.id, MovementKind::Load, 1, MovementCause::Purchase, None)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let err = store.delete(&item.code).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(store.next_code("MAT").unwrap().to_string(), "MAT-0002");
    }

    #[test]
    fn delete_under_row_contention_writes_nothing_and_can_be_retried() {
        let (store, ledger) = setup();
        let item = store.create(new_item(None, Some("MAT"), "Bolt")).unwrap();

        {
            let row = ledger.row(item.id).unwrap();
            let _held = row.lock();
            let err = store.delete(&item.code).unwrap_err();
            assert!(err.is_retriable());
        }
        assert!(!store.read(&item.code).unwrap().deleted);
        ledger
            .append(item.id, MovementKind::Load, 2, MovementCause::Purchase, None)
            .unwrap();

        assert!(store.delete(&item.code).unwrap().deleted);
        let err = ledger
            .append(item.id, MovementKind::Load, 5, MovementCause::Purchase, None)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(ledger.on_hand(item.id).unwrap(), 2);
    }

    #[test]
    fn repeated_delete_retires_a_row_that_was_left_open() {
        let (store, ledger) = setup();
        let item = store.create(new_item(None, Some("MAT"), "Bolt")).unwrap();
        store
            .dispatcher
            .dispatch(
                item.id.into(),
                CATALOG_AGGREGATE_TYPE,
                CatalogCommand::DeleteItem(DeleteItem {
                    item_id: item.id,
                    occurred_at: Utc::now(),
                }),
                make_item,
            )
            .unwrap();
        ledger
            .append(item.id, MovementKind::Load, 1, MovementCause::Purchase, None)
            .unwrap();

        let err = store.delete(&item.code).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        let err = ledger
            .append(item.id, MovementKind::Load, 1, MovementCause::Purchase, None)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }
}

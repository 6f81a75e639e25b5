use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockforge_core::{Aggregate, AggregateRoot, DomainError, ItemId};
use stockforge_events::Event;

use crate::code::ItemCode;

/// Aggregate root: CatalogItem.
///
/// Holds item metadata only. On-hand quantity is owned by the movement ledger
/// and is deliberately absent here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    id: ItemId,
    code: Option<ItemCode>,
    name: String,
    unit: String,
    min_stock: i64,
    deleted: bool,
    version: u64,
    created: bool,
}

impl CatalogItem {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ItemId) -> Self {
        Self {
            id,
            code: None,
            name: String::new(),
            unit: String::new(),
            min_stock: 0,
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ItemId {
        self.id
    }

    pub fn code(&self) -> Option<&ItemCode> {
        self.code.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn min_stock(&self) -> i64 {
        self.min_stock
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for CatalogItem {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItem {
    pub item_id: ItemId,
    pub code: ItemCode,
    pub name: String,
    pub unit: String,
    pub min_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Metadata patch. `on_hand` exists only so a request that tries to set stock
/// directly can be recognized and refused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub unit: Option<String>,
    pub min_stock: Option<i64>,
    #[serde(default, alias = "quantity")]
    pub on_hand: Option<i64>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.unit.is_none() && self.min_stock.is_none() && self.on_hand.is_none()
    }
}

/// Command: UpdateItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItem {
    pub item_id: ItemId,
    pub patch: ItemPatch,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteItem (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteItem {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogCommand {
    CreateItem(CreateItem),
    UpdateItem(UpdateItem),
    DeleteItem(DeleteItem),
}

/// Event: ItemCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreated {
    pub item_id: ItemId,
    pub code: ItemCode,
    pub name: String,
    pub unit: String,
    pub min_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemUpdated. Carries the full metadata after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdated {
    pub item_id: ItemId,
    pub name: String,
    pub unit: String,
    pub min_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDeleted {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogEvent {
    ItemCreated(ItemCreated),
    ItemUpdated(ItemUpdated),
    ItemDeleted(ItemDeleted),
}

impl CatalogEvent {
    pub fn item_id(&self) -> ItemId {
        match self {
            CatalogEvent::ItemCreated(e) => e.item_id,
            CatalogEvent::ItemUpdated(e) => e.item_id,
            CatalogEvent::ItemDeleted(e) => e.item_id,
        }
    }
}

impl Event for CatalogEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CatalogEvent::ItemCreated(_) => "catalog.item.created",
            CatalogEvent::ItemUpdated(_) => "catalog.item.updated",
            CatalogEvent::ItemDeleted(_) => "catalog.item.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CatalogEvent::ItemCreated(e) => e.occurred_at,
            CatalogEvent::ItemUpdated(e) => e.occurred_at,
            CatalogEvent::ItemDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CatalogItem {
    type Command = CatalogCommand;
    type Event = CatalogEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CatalogEvent::ItemCreated(e) => {
                self.id = e.item_id;
                self.code = Some(e.code.clone());
                self.name = e.name.clone();
                self.unit = e.unit.clone();
                self.min_stock = e.min_stock;
                self.deleted = false;
                self.created = true;
            }
            CatalogEvent::ItemUpdated(e) => {
                self.name = e.name.clone();
                self.unit = e.unit.clone();
                self.min_stock = e.min_stock;
            }
            CatalogEvent::ItemDeleted(_) => {
                self.deleted = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CatalogCommand::CreateItem(cmd) => self.handle_create(cmd),
            CatalogCommand::UpdateItem(cmd) => self.handle_update(cmd),
            CatalogCommand::DeleteItem(cmd) => self.handle_delete(cmd),
        }
    }
}

impl CatalogItem {
    fn ensure_item_id(&self, item_id: ItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("item {}", self.id)));
        }
        if self.deleted {
            return Err(DomainError::invalid_state("item is deleted"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateItem) -> Result<Vec<CatalogEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("item already exists"));
        }
        validate_metadata(&cmd.name, &cmd.unit, cmd.min_stock)?;

        Ok(vec![CatalogEvent::ItemCreated(ItemCreated {
            item_id: cmd.item_id,
            code: cmd.code.clone(),
            name: cmd.name.trim().to_string(),
            unit: cmd.unit.trim().to_string(),
            min_stock: cmd.min_stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateItem) -> Result<Vec<CatalogEvent>, DomainError> {
        self.ensure_live()?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.patch.on_hand.is_some() {
            return Err(DomainError::invalid_operation(
                "on-hand quantity can only change through the movement ledger",
            ));
        }
        if cmd.patch.is_empty() {
            return Ok(vec![]);
        }

        let name = cmd.patch.name.as_deref().unwrap_or(&self.name).trim().to_string();
        let unit = cmd.patch.unit.as_deref().unwrap_or(&self.unit).trim().to_string();
        let min_stock = cmd.patch.min_stock.unwrap_or(self.min_stock);
        validate_metadata(&name, &unit, min_stock)?;

        if name == self.name && unit == self.unit && min_stock == self.min_stock {
            return Ok(vec![]);
        }

        Ok(vec![CatalogEvent::ItemUpdated(ItemUpdated {
            item_id: cmd.item_id,
            name,
            unit,
            min_stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteItem) -> Result<Vec<CatalogEvent>, DomainError> {
        self.ensure_live()?;
        self.ensure_item_id(cmd.item_id)?;

        Ok(vec![CatalogEvent::ItemDeleted(ItemDeleted {
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn validate_metadata(name: &str, unit: &str, min_stock: i64) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    if unit.trim().is_empty() {
        return Err(DomainError::validation("unit of measure cannot be empty"));
    }
    if min_stock < 0 {
        return Err(DomainError::validation("min_stock cannot be negative"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created_item() -> CatalogItem {
        let id = ItemId::new();
        let mut item = CatalogItem::empty(id);
        let events = item
            .handle(&CatalogCommand::CreateItem(CreateItem {
                item_id: id,
                code: "MAT-0001".parse().unwrap(),
                name: " Steel bolt ".into(),
                unit: "pz".into(),
                min_stock: 20,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            item.apply(e);
        }
        item
    }

    #[test]
    fn create_trims_metadata() {
        let item = created_item();
        assert_eq!(item.name(), "Steel bolt");
        assert_eq!(item.code().unwrap().to_string(), "MAT-0001");
        assert_eq!(item.min_stock(), 20);
        assert_eq!(item.version(), 1);
    }

    #[test]
    fn update_rejects_direct_quantity_change() {
        let item = created_item();
        let err = item
            .handle(&CatalogCommand::UpdateItem(UpdateItem {
                item_id: item.id_typed(),
                patch: ItemPatch {
                    on_hand: Some(500),
                    ..ItemPatch::default()
                },
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidOperation(_)));
    }

    #[test]
    fn update_without_change_emits_nothing() {
        let item = created_item();
        let events = item
            .handle(&CatalogCommand::UpdateItem(UpdateItem {
                item_id: item.id_typed(),
                patch: ItemPatch {
                    name: Some("Steel bolt".into()),
                    ..ItemPatch::default()
                },
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn deleted_item_cannot_be_deleted_again() {
        let mut item = created_item();
        let delete = CatalogCommand::DeleteItem(DeleteItem {
            item_id: item.id_typed(),
            occurred_at: Utc::now(),
        });
        let events = item.handle(&delete).unwrap();
        item.apply(&events[0]);
        assert!(item.is_deleted());

        let err = item.handle(&delete).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn negative_min_stock_is_invalid() {
        let item = created_item();
        let err = item
            .handle(&CatalogCommand::UpdateItem(UpdateItem {
                item_id: item.id_typed(),
                patch: ItemPatch {
                    min_stock: Some(-1),
                    ..ItemPatch::default()
                },
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn update_on_missing_item_is_not_found() {
        let item = CatalogItem::empty(ItemId::new());
        let err = item
            .handle(&CatalogCommand::UpdateItem(UpdateItem {
                item_id: item.id_typed(),
                patch: ItemPatch::default(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}

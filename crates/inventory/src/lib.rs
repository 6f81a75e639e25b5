//! Inventory domain module.
//!
//! Catalog item metadata (event-sourced), item codes, and the pure movement
//! model the ledger journals. No IO, no locking, no storage.

pub mod code;
pub mod item;
pub mod movement;

pub use code::ItemCode;
pub use item::{
    CatalogCommand, CatalogEvent, CatalogItem, CreateItem, DeleteItem, ItemCreated, ItemDeleted,
    ItemPatch, ItemUpdated, UpdateItem,
};
pub use movement::{
    Movement, MovementCause, MovementDraft, MovementKind, StockEvent, StockPolicy, replay,
    resulting_quantity, stage,
};

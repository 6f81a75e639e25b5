//! Production domain module.
//!
//! Versioned bills of materials and the production order lifecycle.

pub mod bom;
pub mod order;

pub use bom::{BillOfMaterials, BomComponent, consumption_for};
pub use order::{
    CompleteOrder, CompletionRecord, CompletionWarning, OrderCompleted, OrderNumber, OrderPlaced,
    OrderRescheduled, OrderTransitioned, PlaceOrder, ProductionCommand, ProductionEvent,
    ProductionOrder, ProductionStatus, RescheduleOrder, Transition,
};

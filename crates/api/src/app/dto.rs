use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockforge_core::{BomId, ItemId};
use stockforge_inventory::{ItemCode, MovementCause, MovementKind};
use stockforge_production::BillOfMaterials;

use stockforge_infra::catalog::ItemDirectory;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListItemsQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct NextCodeQuery {
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendMovementRequest {
    pub kind: MovementKind,
    pub quantity: i64,
    pub cause: MovementCause,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BomComponentRequest {
    /// Item code of the component, e.g. `MAT-0001`.
    pub component: String,
    pub quantity_per_unit: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterBomRequest {
    pub finished_good: String,
    pub name: String,
    pub components: Vec<BomComponentRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListBomsQuery {
    pub finished_good: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductionOrderRequest {
    pub number: Option<String>,
    pub finished_good: String,
    pub requested_quantity: i64,
    pub bom: Option<BomId>,
    pub planned_start: Option<DateTime<Utc>>,
    pub estimated_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransitionRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RescheduleRequest {
    pub planned_start: Option<DateTime<Utc>>,
    pub estimated_end: Option<DateTime<Utc>>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct NextCodeResponse {
    pub code: ItemCode,
}

#[derive(Debug, Serialize)]
pub struct BomComponentView {
    pub component: Option<ItemCode>,
    pub item_id: ItemId,
    pub quantity_per_unit: i64,
}

#[derive(Debug, Serialize)]
pub struct BomView {
    pub id: BomId,
    pub finished_good: Option<ItemCode>,
    pub finished_good_id: ItemId,
    pub name: String,
    pub version: u32,
    pub active: bool,
    pub components: Vec<BomComponentView>,
    pub created_at: DateTime<Utc>,
}

impl BomView {
    pub fn from_bom(bom: &BillOfMaterials, active: bool, directory: &dyn ItemDirectory) -> Self {
        Self {
            id: bom.id(),
            finished_good: directory.code_of(bom.finished_good()),
            finished_good_id: bom.finished_good(),
            name: bom.name().to_string(),
            version: bom.version(),
            active,
            components: bom
                .components()
                .iter()
                .map(|c| BomComponentView {
                    component: directory.code_of(c.component),
                    item_id: c.component,
                    quantity_per_unit: c.quantity_per_unit,
                })
                .collect(),
            created_at: bom.created_at(),
        }
    }
}

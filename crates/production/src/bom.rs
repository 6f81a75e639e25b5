//! Bills of materials.
//!
//! A `BillOfMaterials` is an immutable version. Revising a recipe produces a
//! new version with a new `BomId`; orders keep pointing at the version they
//! were placed with.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockforge_core::{BomId, DomainError, ItemId, ValueObject};

/// One line of a BOM: how much of `component` one finished unit consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomComponent {
    pub component: ItemId,
    pub quantity_per_unit: i64,
}

impl ValueObject for BomComponent {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillOfMaterials {
    id: BomId,
    finished_good: ItemId,
    name: String,
    version: u32,
    components: Vec<BomComponent>,
    created_at: DateTime<Utc>,
}

impl BillOfMaterials {
    /// Build a validated BOM version.
    ///
    /// Rejects a component list that references the finished good itself
    /// (`CyclicBom`), empty lists, non-positive quantities and duplicates.
    pub fn new(
        id: BomId,
        finished_good: ItemId,
        name: impl Into<String>,
        version: u32,
        components: Vec<BomComponent>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("BOM name cannot be empty"));
        }
        if version == 0 {
            return Err(DomainError::validation("BOM version starts at 1"));
        }
        if components.is_empty() {
            return Err(DomainError::validation("BOM needs at least one component"));
        }

        let mut seen = HashSet::with_capacity(components.len());
        for c in &components {
            if c.component == finished_good {
                return Err(DomainError::cyclic_bom(format!(
                    "BOM '{name}' consumes its own finished good {finished_good}"
                )));
            }
            if c.quantity_per_unit <= 0 {
                return Err(DomainError::validation(format!(
                    "component {} quantity_per_unit must be positive",
                    c.component
                )));
            }
            if !seen.insert(c.component) {
                return Err(DomainError::validation(format!(
                    "component {} listed more than once",
                    c.component
                )));
            }
        }

        Ok(Self {
            id,
            finished_good,
            name,
            version,
            components,
            created_at,
        })
    }

    pub fn id(&self) -> BomId {
        self.id
    }

    pub fn finished_good(&self) -> ItemId {
        self.finished_good
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Components in declaration order.
    pub fn components(&self) -> &[BomComponent] {
        &self.components
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Per-unit quantity of `item`, if this BOM consumes it.
    pub fn consumes(&self, item: ItemId) -> Option<i64> {
        self.components
            .iter()
            .find(|c| c.component == item)
            .map(|c| c.quantity_per_unit)
    }
}

/// Total consumption of each component for `requested` finished units.
pub fn consumption_for(
    components: &[BomComponent],
    requested: i64,
) -> Result<Vec<(ItemId, i64)>, DomainError> {
    components
        .iter()
        .map(|c| {
            c.quantity_per_unit
                .checked_mul(requested)
                .map(|qty| (c.component, qty))
                .ok_or_else(|| DomainError::invariant("component consumption overflow"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(component: ItemId, quantity_per_unit: i64) -> BomComponent {
        BomComponent {
            component,
            quantity_per_unit,
        }
    }

    #[test]
    fn rejects_self_reference() {
        let fin = ItemId::new();
        let err = BillOfMaterials::new(BomId::new(), fin, "Table", 1, vec![line(fin, 1)], Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::CyclicBom(_)));
    }

    #[test]
    fn rejects_duplicates_and_bad_quantities() {
        let fin = ItemId::new();
        let leg = ItemId::new();
        assert!(BillOfMaterials::new(BomId::new(), fin, "T", 1, vec![line(leg, 0)], Utc::now()).is_err());
        assert!(
            BillOfMaterials::new(BomId::new(), fin, "T", 1, vec![line(leg, 4), line(leg, 1)], Utc::now())
                .is_err()
        );
        assert!(BillOfMaterials::new(BomId::new(), fin, "T", 1, vec![], Utc::now()).is_err());
    }

    #[test]
    fn consumption_multiplies_and_keeps_order() {
        let a = ItemId::new();
        let b = ItemId::new();
        let bom = BillOfMaterials::new(
            BomId::new(),
            ItemId::new(),
            "Widget",
            1,
            vec![line(a, 2), line(b, 1)],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(consumption_for(bom.components(), 5).unwrap(), vec![(a, 10), (b, 5)]);
        assert_eq!(bom.consumes(a), Some(2));
        assert_eq!(bom.consumes(bom.finished_good()), None);
    }

    #[test]
    fn consumption_overflow_is_reported() {
        let err = consumption_for(&[line(ItemId::new(), i64::MAX)], 2).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}

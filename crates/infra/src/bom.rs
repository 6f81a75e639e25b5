//! BOM resolver: registry of immutable bill-of-materials versions.
//!
//! Versions live in an append-only arena keyed by `BomId`. Registering a
//! revision adds a version and moves the finished good's active pointer; the
//! previous version stays resolvable for orders that were placed with it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::info;

use stockforge_core::{BomId, DomainError, DomainResult, ItemId};
use stockforge_production::{BillOfMaterials, BomComponent};

use crate::catalog::ItemDirectory;

pub struct BomRepository {
    directory: Arc<dyn ItemDirectory>,
    boms: RwLock<HashMap<BomId, Arc<BillOfMaterials>>>,
    active: RwLock<HashMap<ItemId, BomId>>,
}

impl core::fmt::Debug for BomRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BomRepository")
            .field("versions", &self.boms.read().len())
            .finish()
    }
}

impl BomRepository {
    pub fn new(directory: Arc<dyn ItemDirectory>) -> Self {
        Self {
            directory,
            boms: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Register the next version for `finished_good` and make it active.
    pub fn register(
        &self,
        finished_good: ItemId,
        name: &str,
        components: Vec<BomComponent>,
    ) -> DomainResult<Arc<BillOfMaterials>> {
        if !self.directory.contains(finished_good) {
            return Err(DomainError::not_found(format!("finished good {finished_good}")));
        }
        for c in &components {
            if c.component != finished_good && !self.directory.contains(c.component) {
                return Err(DomainError::not_found(format!("component {}", c.component)));
            }
        }

        let mut boms = self.boms.write();
        let version = boms
            .values()
            .filter(|b| b.finished_good() == finished_good)
            .map(|b| b.version())
            .max()
            .unwrap_or(0)
            + 1;

        let bom = Arc::new(BillOfMaterials::new(
            BomId::new(),
            finished_good,
            name,
            version,
            components,
            Utc::now(),
        )?);
        boms.insert(bom.id(), bom.clone());
        self.active.write().insert(finished_good, bom.id());

        info!(bom = %bom.id(), %finished_good, version, "bill of materials registered");
        Ok(bom)
    }

    /// Ordered components of a BOM version.
    pub fn resolve(&self, bom: BomId) -> DomainResult<Vec<BomComponent>> {
        Ok(self.get(bom)?.components().to_vec())
    }

    pub fn get(&self, bom: BomId) -> DomainResult<Arc<BillOfMaterials>> {
        self.boms
            .read()
            .get(&bom)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("bill of materials {bom}")))
    }

    /// Versions sorted by finished good then version, optionally for one finished good.
    pub fn list(&self, finished_good: Option<ItemId>) -> Vec<Arc<BillOfMaterials>> {
        let mut out: Vec<_> = self
            .boms
            .read()
            .values()
            .filter(|b| finished_good.is_none_or(|fg| b.finished_good() == fg))
            .cloned()
            .collect();
        out.sort_by_key(|b| (b.finished_good(), b.version()));
        out
    }

    pub fn active_bom_for(&self, finished_good: ItemId) -> Option<BomId> {
        self.active.read().get(&finished_good).copied()
    }

    /// Remove a version. If it was active, the finished good has no active BOM afterwards.
    pub fn withdraw(&self, bom: BomId) -> DomainResult<()> {
        let removed = self
            .boms
            .write()
            .remove(&bom)
            .ok_or_else(|| DomainError::not_found(format!("bill of materials {bom}")))?;

        let mut active = self.active.write();
        if active.get(&removed.finished_good()) == Some(&bom) {
            active.remove(&removed.finished_good());
        }
        info!(%bom, finished_good = %removed.finished_good(), "bill of materials withdrawn");
        Ok(())
    }
}

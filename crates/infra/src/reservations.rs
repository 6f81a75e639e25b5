//! Reservation aggregator: read-side view of reserved and incoming stock.
//!
//! Everything here is derived from projections and external demand. No
//! ledger row lock is ever taken and nothing is written, so the view can lag
//! the ledger by the cache TTL plus projection delay. It is informational
//! only and never feeds a ledger decision.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use stockforge_core::{DomainResult, ItemId};
use stockforge_inventory::ItemCode;

use crate::bom::BomRepository;
use crate::catalog::ItemDirectory;
use crate::projections::ProjectionSet;

/// One line of open sales demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demand {
    pub item_id: ItemId,
    pub quantity: i64,
    pub open: bool,
}

/// Read-only access to sales-order demand owned by another subsystem.
pub trait DemandSource: Send + Sync {
    fn demand_for(&self, item_id: ItemId) -> Vec<Demand>;
}

/// Demand source backed by an in-process list (tests, single-node setups).
#[derive(Debug, Default)]
pub struct InMemoryDemandSource {
    lines: RwLock<Vec<Demand>>,
}

impl InMemoryDemandSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, demand: Demand) {
        self.lines.write().push(demand);
    }
}

impl DemandSource for InMemoryDemandSource {
    fn demand_for(&self, item_id: ItemId) -> Vec<Demand> {
        self.lines.read().iter().filter(|l| l.item_id == item_id).cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationView {
    pub item_id: ItemId,
    pub code: Option<ItemCode>,
    pub on_hand: i64,
    pub reserved: i64,
    pub incoming: i64,
    pub available: i64,
    pub below_minimum: bool,
    pub computed_at: DateTime<Utc>,
}

pub struct ReservationAggregator {
    directory: Arc<dyn ItemDirectory>,
    boms: Arc<BomRepository>,
    projections: ProjectionSet,
    demand: Arc<dyn DemandSource>,
    ttl: Duration,
    cache: RwLock<HashMap<ItemId, (Instant, ReservationView)>>,
}

impl core::fmt::Debug for ReservationAggregator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReservationAggregator")
            .field("ttl", &self.ttl)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl ReservationAggregator {
    pub fn new(
        directory: Arc<dyn ItemDirectory>,
        boms: Arc<BomRepository>,
        projections: ProjectionSet,
        demand: Arc<dyn DemandSource>,
        ttl: Duration,
    ) -> Self {
        Self {
            directory,
            boms,
            projections,
            demand,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn reservation_for(&self, code: &ItemCode) -> DomainResult<ReservationView> {
        let item_id = self.directory.resolve_code(code)?;
        self.reservation_for_item(item_id)
    }

    pub fn reservation_for_item(&self, item_id: ItemId) -> DomainResult<ReservationView> {
        if let Some((at, view)) = self.cache.read().get(&item_id) {
            if at.elapsed() < self.ttl {
                return Ok(view.clone());
            }
        }

        let view = self.compute(item_id)?;
        self.cache.write().insert(item_id, (Instant::now(), view.clone()));
        Ok(view)
    }

    /// Drop every cached view.
    pub fn invalidate(&self) {
        self.cache.write().clear();
    }

    fn compute(&self, item_id: ItemId) -> DomainResult<ReservationView> {
        let min_stock = self.directory.min_stock(item_id)?;
        let on_hand = self.projections.stock_levels.on_hand(&item_id);

        let sales: i64 = self
            .demand
            .demand_for(item_id)
            .iter()
            .filter(|d| d.open && d.item_id == item_id && d.quantity > 0)
            .fold(0i64, |acc, d| acc.saturating_add(d.quantity));

        let mut production = 0i64;
        let mut incoming = 0i64;
        for order in self.projections.production_orders.open_orders() {
            if order.finished_good == item_id {
                incoming = incoming.saturating_add(order.requested_quantity);
            }
            let Some(bom_id) = order.bom else { continue };
            match self.boms.get(bom_id) {
                Ok(bom) => {
                    if let Some(per_unit) = bom.consumes(item_id) {
                        production = production.saturating_add(per_unit.saturating_mul(order.requested_quantity));
                    }
                }
                Err(_) => {
                    warn!(order = %order.number, bom = %bom_id, "open order references a withdrawn BOM");
                }
            }
        }

        let reserved = sales.saturating_add(production);
        let available = on_hand.saturating_sub(reserved);
        debug!(item = %item_id, on_hand, reserved, incoming, "reservation computed");

        Ok(ReservationView {
            item_id,
            code: self.directory.code_of(item_id),
            on_hand,
            reserved,
            incoming,
            available,
            below_minimum: available < min_stock,
            computed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    use chrono::Utc;
    use serde_json::json;
    use stockforge_core::{BomId, DomainError, ProductionOrderId};
    use stockforge_events::EventEnvelope;
    use stockforge_production::{BomComponent, OrderNumber, OrderPlaced, ProductionEvent};

    use crate::ledger::STOCK_AGGREGATE_TYPE;
    use crate::projections::PRODUCTION_AGGREGATE_TYPE;

    struct Directory(Map<ItemId, (ItemCode, i64)>);

    impl ItemDirectory for Directory {
        fn resolve_code(&self, code: &ItemCode) -> DomainResult<ItemId> {
            self.0
                .iter()
                .find(|(_, (c, _))| c == code)
                .map(|(id, _)| *id)
                .ok_or_else(|| DomainError::not_found(code.to_string()))
        }

        fn code_of(&self, item_id: ItemId) -> Option<ItemCode> {
            self.0.get(&item_id).map(|(c, _)| c.clone())
        }

        fn min_stock(&self, item_id: ItemId) -> DomainResult<i64> {
            self.0
                .get(&item_id)
                .map(|(_, m)| *m)
                .ok_or_else(|| DomainError::not_found(item_id.to_string()))
        }
    }

    struct Fixture {
        mat: ItemId,
        fin: ItemId,
        bom: BomId,
        projections: ProjectionSet,
        demand: Arc<InMemoryDemandSource>,
        aggregator: ReservationAggregator,
    }

    fn fixture(ttl: Duration) -> Fixture {
        let (mat, fin) = (ItemId::new(), ItemId::new());
        let directory: Arc<dyn ItemDirectory> = Arc::new(Directory(Map::from([
            (mat, (ItemCode::new("MAT", 1).unwrap(), 20)),
            (fin, (ItemCode::new("FIN", 2).unwrap(), 0)),
        ])));
        let boms = Arc::new(BomRepository::new(directory.clone()));
        let bom = boms
            .register(
                fin,
                "Frame",
                vec![BomComponent {
                    component: mat,
                    quantity_per_unit: 2,
                }],
            )
            .unwrap()
            .id();
        let projections = ProjectionSet::new();
        let demand = Arc::new(InMemoryDemandSource::new());
        let aggregator =
            ReservationAggregator::new(directory, boms, projections.clone(), demand.clone(), ttl);
        Fixture {
            mat,
            fin,
            bom,
            projections,
            demand,
            aggregator,
        }
    }

    fn stock(f: &Fixture, item: ItemId, seq: u64, resulting: i64) {
        let payload = json!({"MovementRecorded": {
            "id": uuid::Uuid::now_v7(),
            "item_id": item,
            "sequence": seq,
            "kind": "adjust",
            "quantity": resulting,
            "cause": "inventory-count",
            "prior": 0,
            "resulting": resulting,
            "recorded_at": Utc::now(),
            "note": null,
            "transaction": null
        }});
        f.projections
            .route(&EventEnvelope::new(uuid::Uuid::now_v7(), item.into(), STOCK_AGGREGATE_TYPE, seq, payload))
            .unwrap();
    }

    fn place(f: &Fixture, requested: i64) {
        let order_id = ProductionOrderId::new();
        let event = ProductionEvent::OrderPlaced(OrderPlaced {
            order_id,
            number: OrderNumber::parse("OP-01").unwrap(),
            finished_good: f.fin,
            bom: Some(f.bom),
            requested_quantity: requested,
            planned_start: None,
            estimated_end: None,
            occurred_at: Utc::now(),
        });
        let env = EventEnvelope::new(
            uuid::Uuid::now_v7(),
            order_id.into(),
            PRODUCTION_AGGREGATE_TYPE,
            1,
            serde_json::to_value(&event).unwrap(),
        );
        f.projections.route(&env).unwrap();
    }

    #[test]
    fn combines_sales_and_production_demand() {
        let f = fixture(Duration::ZERO);
        stock(&f, f.mat, 1, 70);
        f.demand.record(Demand {
            item_id: f.mat,
            quantity: 15,
            open: true,
        });
        f.demand.record(Demand {
            item_id: f.mat,
            quantity: 99,
            open: false,
        });
        place(&f, 10);

        let view = f.aggregator.reservation_for_item(f.mat).unwrap();
        assert_eq!(view.on_hand, 70);
        assert_eq!(view.reserved, 15 + 20);
        assert_eq!(view.available, 35);
        assert!(!view.below_minimum);

        let fin = f.aggregator.reservation_for_item(f.fin).unwrap();
        assert_eq!(fin.incoming, 10);
        assert_eq!(fin.reserved, 0);
    }

    #[test]
    fn flags_below_minimum() {
        let f = fixture(Duration::ZERO);
        stock(&f, f.mat, 1, 25);
        f.demand.record(Demand {
            item_id: f.mat,
            quantity: 10,
            open: true,
        });
        let view = f.aggregator.reservation_for(&ItemCode::new("MAT", 1).unwrap()).unwrap();
        assert_eq!(view.available, 15);
        assert!(view.below_minimum);
    }

    #[test]
    fn cached_until_invalidated() {
        let f = fixture(Duration::from_secs(60));
        stock(&f, f.mat, 1, 10);
        assert_eq!(f.aggregator.reservation_for_item(f.mat).unwrap().on_hand, 10);

        stock(&f, f.mat, 2, 40);
        assert_eq!(f.aggregator.reservation_for_item(f.mat).unwrap().on_hand, 10);

        f.aggregator.invalidate();
        assert_eq!(f.aggregator.reservation_for_item(f.mat).unwrap().on_hand, 40);
    }

    #[test]
    fn unknown_code_is_not_found() {
        let f = fixture(Duration::ZERO);
        let err = f.aggregator.reservation_for(&ItemCode::new("ZZZ", 9).unwrap()).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}

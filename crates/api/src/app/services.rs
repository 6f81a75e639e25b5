//! In-process wiring of every StockForge service behind one shared bus.
//!
//! ```text
//! CommandDispatcher ──┐
//!                     ├─► InMemoryEventBus ─► ProjectionWorker ─► ProjectionSet
//! MovementLedger ─────┘
//! ```

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::info;

use stockforge_events::{EventEnvelope, InMemoryEventBus};
use stockforge_infra::bom::BomRepository;
use stockforge_infra::catalog::{CatalogItemStore, ItemDirectory};
use stockforge_infra::command_dispatcher::CommandDispatcher;
use stockforge_infra::completion::CompletionCoordinator;
use stockforge_infra::config::StockForgeConfig;
use stockforge_infra::event_store::InMemoryEventStore;
use stockforge_infra::ledger::MovementLedger;
use stockforge_infra::production::{OrderLocks, ProductionOrderManager};
use stockforge_infra::projections::ProjectionSet;
use stockforge_infra::reservations::{InMemoryDemandSource, ReservationAggregator};
use stockforge_infra::workers::{ProjectionWorker, WorkerHandle};

pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Store = Arc<InMemoryEventStore>;

pub struct AppServices {
    pub config: StockForgeConfig,
    pub ledger: Arc<MovementLedger<Bus>>,
    pub catalog: Arc<CatalogItemStore<Store, Bus>>,
    pub boms: Arc<BomRepository>,
    pub projections: ProjectionSet,
    pub reservations: Arc<ReservationAggregator>,
    pub orders: Arc<ProductionOrderManager<Store, Bus>>,
    /// Sales demand feed. In-process until the sales-order subsystem is connected.
    pub demand: Arc<InMemoryDemandSource>,
    _projection_worker: WorkerHandle,
}

pub fn build_services(config: StockForgeConfig) -> std::io::Result<AppServices> {
    let store: Store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    // Background subscriber: bus -> projections. Subscribed before any command runs.
    let projections = ProjectionSet::new();
    let worker = {
        let projections = projections.clone();
        ProjectionWorker::spawn("stockforge.projections", &bus, move |env: EventEnvelope<JsonValue>| {
            projections.route(&env)
        })?
    };

    let dispatcher = Arc::new(CommandDispatcher::new(store, bus.clone()));
    let ledger = Arc::new(
        MovementLedger::new(bus)
            .with_policy(config.stock_policy)
            .with_lock_timeout(config.lock_timeout)
            .with_retry(config.retry.clone()),
    );

    let catalog = Arc::new(CatalogItemStore::new(dispatcher.clone(), ledger.clone()));
    let directory: Arc<dyn ItemDirectory> = catalog.clone();
    let boms = Arc::new(BomRepository::new(directory.clone()));

    let locks = Arc::new(OrderLocks::new(config.lock_timeout));
    let coordinator = Arc::new(CompletionCoordinator::new(
        dispatcher.clone(),
        ledger.clone(),
        boms.clone(),
        locks.clone(),
        config.retry.clone(),
    ));
    let orders = Arc::new(ProductionOrderManager::new(
        dispatcher,
        boms.clone(),
        directory.clone(),
        projections.production_orders.clone(),
        locks,
        coordinator,
    ));

    let demand = Arc::new(InMemoryDemandSource::new());
    let reservations = Arc::new(ReservationAggregator::new(
        directory,
        boms.clone(),
        projections.clone(),
        demand.clone(),
        config.reservation_ttl,
    ));

    info!(
        allow_negative = config.stock_policy.allow_negative,
        lock_timeout_ms = config.lock_timeout.as_millis() as u64,
        "services wired"
    );

    Ok(AppServices {
        config,
        ledger,
        catalog,
        boms,
        projections,
        reservations,
        orders,
        demand,
        _projection_worker: worker,
    })
}

//! Infrastructure layer: event store, movement ledger, projections and the
//! services that tie the domain crates together.
//!
//! ```text
//! CatalogItemStore ─┐                        ┌─► StockLevelsProjection
//! BomRepository ────┼─► CommandDispatcher ──►│
//! ProductionOrder   │   MovementLedger ─────►├─► ProductionOrdersProjection
//!   Manager ────────┘        ▲               │
//! CompletionCoordinator ─────┘   EventBus ───┘   ReservationAggregator (reads)
//! ```

pub mod bom;
pub mod catalog;
pub mod command_dispatcher;
pub mod completion;
pub mod config;
pub mod event_store;
pub mod ledger;
pub mod production;
pub mod projections;
pub mod read_model;
pub mod reservations;
pub mod retry;
pub mod workers;

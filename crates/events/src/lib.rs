//! Event mechanics shared by the domain and infrastructure crates.
//!
//! - `Event`: typed domain facts (append-only, versioned)
//! - `EventEnvelope`: stream metadata around a payload
//! - `EventBus`: pub/sub distribution after persistence

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};

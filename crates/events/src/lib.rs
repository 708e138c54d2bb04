//! Ledger facts published to downstream consumers.
//!
//! The ledger tables are the source of truth; events are only a notification that
//! a write has committed (entry posted, entry voided) so that other modules can react.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};

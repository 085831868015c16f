//! Change notifications for ledger writes.
//!
//! Mechanics only: the `Event` contract, a pub/sub `EventBus`, and an
//! in-memory bus. Concrete event types live in the domain crates.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, NoopEventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};

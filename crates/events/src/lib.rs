//! Domain events and their transport.
//!
//! Receiving operations describe what happened as [`Event`]s. Audit consumers get
//! them wrapped in an [`EventEnvelope`] through an [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};

//! Typed publish/subscribe plumbing.
//!
//! The offline pipeline publishes its notifications (`sync-start`,
//! `sync-complete`, `queued`, `transaction-synced`) through an [`EventBus`]
//! parameterised over a message enum, so listeners are type-checked and any
//! number of them can subscribe.

pub mod bus;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};

//! Managed-subscription transport.
//!
//! This module contains the managed bus and the service it talks to:
//! - service - narrow client interface to a Pub/Sub-like service (service.rs)
//! - memory - in-process emulator of that service (memory.rs)
//!
//! No production service binding ships with the crate; callers provide one
//! by implementing [`ManagedConnector`].

mod bus;
mod memory;
mod service;

pub use bus::{create_managed_bus, ManagedBus, ManagedConfig};
pub use memory::MemoryPubSub;
pub use service::{
    //
    AckReply,
    ManagedClient,
    ManagedConnector,
    ManagedSubscription,
    ReceivedMessage,
};

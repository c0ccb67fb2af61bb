//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! transport implementations or client libraries.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod bus;
mod registry;

// --- Bus domain re-exports ---

pub use bus::{
    //
    Bus,
    BusKind,
    BusPtr,
    Listener,
};

pub use registry::ListenerRegistry;

pub(crate) use registry::{
    //
    lock_ignore_poison,
    shared_registry,
    SharedRegistry,
};

//! Port definitions: traits that adapters and hosts implement.
//!
//! Ports are the boundaries between the dispatch core and the outside world.
//! They are defined here (in `app`) so that both the core and the adapter
//! crates can depend on them without creating circular dependencies.

pub mod extension;
pub mod mutation;
pub mod transport;

pub use extension::{CommandBuilder, Emitter, Extension, Frames, NetworkDriver};
pub use mutation::{Mutation, MutationObserver, NoopObserver};
pub use transport::{Connection, TransportError};

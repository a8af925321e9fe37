//! # homehub-app
//!
//! Runtime core of the hub: everything between a logical command and the
//! bytes written to a device.
//!
//! ## Responsibilities
//! - Define **port traits** implemented by vendor extensions and hosts:
//!   - `CommandBuilder` / `Emitter`: encode a command for one device model
//!   - `NetworkDriver` / `Connection`: dial and write to a hub
//!   - `MutationObserver`: persist changes that must survive a restart
//! - Keep the **device registry** (snapshot reads, serialized writes)
//! - Pool hub connections and dispatch commands in per-hub order
//! - Run **recipes**: supervise triggers, execute actions
//! - Broadcast outcome, trigger and connection events in process
//!
//! ## Dependency rule
//! Depends on `homehub-domain` only (plus tokio and friends for the
//! runtime). Never imports adapter crates. Adapters depend on *this* crate,
//! not the reverse.

pub mod event_bus;
pub mod extensions;
pub mod pool;
pub mod ports;
pub mod processor;
pub mod recipe;
pub mod registry;
pub mod system;

#[cfg(test)]
pub(crate) mod testing;

//! # homehub-adapter-lutron
//!
//! Drives Lutron Smart Bridge Pro hubs through their telnet integration
//! protocol.
//!
//! ## Provided pieces
//!
//! | Piece | Key | Behaviour |
//! |-------|-----|-----------|
//! | [`LutronBuilder`] | model `l-bdgpro2-wh` | Encodes zone levels and button presses as `#OUTPUT` / `#DEVICE` lines |
//! | [`TelnetNetwork`] | network `lutron` | Dials port 23 and performs the login handshake |
//!
//! ## Dependency rule
//!
//! Depends on `homehub-app` (port traits) and `homehub-domain` only.

mod builder;
mod error;
mod telnet;

use std::sync::Arc;

use homehub_app::extensions::{ExtensionRegistry, RegistrationError};
use homehub_app::ports::Extension;

pub use builder::{LutronBuilder, SMART_BRIDGE_PRO};
pub use error::LutronError;
pub use telnet::{NETWORK_KIND, TelnetNetwork};

/// Registers the Smart Bridge Pro builder and the telnet network.
#[derive(Debug, Default, Clone, Copy)]
pub struct LutronExtension;

impl Extension for LutronExtension {
    fn name(&self) -> &str {
        "lutron"
    }

    fn register(&self, registry: &mut ExtensionRegistry) -> Result<(), RegistrationError> {
        registry.register_builder(Arc::new(LutronBuilder::new(SMART_BRIDGE_PRO)))?;
        registry.register_network(Arc::new(TelnetNetwork::default()))
    }
}

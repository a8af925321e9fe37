//! # homehub-adapter-fluxwifi
//!
//! Drives Flux WiFi bulbs. Every bulb is its own hub with a single zone;
//! the bulb listens on TCP port 5577 and speaks a small binary protocol.
//!
//! ## Dependency rule
//!
//! Depends on `homehub-app` (port traits) and `homehub-domain` only.

mod network;
mod protocol;

use std::sync::Arc;

use homehub_app::extensions::{ExtensionRegistry, RegistrationError};
use homehub_app::ports::{CommandBuilder, Emitter, Extension, Frames};
use homehub_app::registry::Catalog;
use homehub_domain::command::Command;
use homehub_domain::error::CommandError;

pub use network::{NETWORK_KIND, TcpNetwork};

pub const MODEL_ID: &str = "fluxwifi";

/// Encodes zone levels as power and white-channel frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FluxBuilder;

impl CommandBuilder for FluxBuilder {
    fn id(&self) -> &str {
        MODEL_ID
    }

    fn build(&self, command: &Command, _catalog: &Catalog) -> Result<Box<dyn Emitter>, CommandError> {
        let Some((_, level)) = command.zone_level() else {
            return Err(CommandError::unsupported(format!(
                "flux wifi bulbs cannot handle {}",
                command.kind()
            )));
        };
        let frames = if level.is_off() {
            vec![protocol::power(false)]
        } else {
            vec![protocol::power(true), protocol::warm_white(level.scaled(u8::MAX))]
        };
        Ok(Box::new(Frames(frames)))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FluxExtension;

impl Extension for FluxExtension {
    fn name(&self) -> &str {
        "fluxwifi"
    }

    fn register(&self, registry: &mut ExtensionRegistry) -> Result<(), RegistrationError> {
        registry.register_builder(Arc::new(FluxBuilder))?;
        registry.register_network(Arc::new(TcpNetwork))
    }
}

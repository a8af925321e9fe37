//! # homehub-adapter-virtual
//!
//! Simulated hubs that live in memory. Used by the daemon's demo home and
//! by end-to-end tests that need to observe what reached the wire.
//!
//! ## Provided pieces
//!
//! | Piece | Key | Behaviour |
//! |-------|-----|-----------|
//! | [`VirtualBuilder`] | model `virtual-hub` | Encodes commands as `SET` / `PRESS` / `RELEASE` text lines |
//! | [`VirtualNetwork`] | network `virtual` | Dials a simulated hub keyed by its address |
//!
//! Each hub keeps a journal of every line it received and the last level
//! of each zone address. Hubs can be taken offline to exercise redial and
//! error paths.
//!
//! ## Dependency rule
//!
//! Depends on `homehub-app` (port traits) and `homehub-domain` only.

mod plant;

use std::sync::Arc;

use async_trait::async_trait;

use homehub_app::extensions::{ExtensionRegistry, RegistrationError};
use homehub_app::ports::{CommandBuilder, Connection, Emitter, Extension, Frames, NetworkDriver, TransportError};
use homehub_app::registry::Catalog;
use homehub_domain::command::Command;
use homehub_domain::device::ConnectionInfo;
use homehub_domain::error::CommandError;

pub use plant::VirtualPlant;

pub const MODEL_ID: &str = "virtual-hub";
pub const NETWORK_KIND: &str = "virtual";

#[derive(Debug, Default, Clone, Copy)]
pub struct VirtualBuilder;

impl CommandBuilder for VirtualBuilder {
    fn id(&self) -> &str {
        MODEL_ID
    }

    fn build(&self, command: &Command, _catalog: &Catalog) -> Result<Box<dyn Emitter>, CommandError> {
        let line = if let Some((zone, level)) = command.zone_level() {
            format!("SET {} {}", zone.address, level.value())
        } else {
            match command {
                Command::ButtonPress { button } => {
                    format!("PRESS {} {}", button.device_address, button.button_address)
                }
                Command::ButtonRelease { button } => {
                    format!("RELEASE {} {}", button.device_address, button.button_address)
                }
                other => {
                    return Err(CommandError::unsupported(format!(
                        "virtual hubs cannot encode {}",
                        other.kind()
                    )));
                }
            }
        };
        Ok(Box::new(Frames::one(line)))
    }
}

/// Connects to hubs of a shared [`VirtualPlant`].
#[derive(Debug, Clone)]
pub struct VirtualNetwork {
    plant: VirtualPlant,
}

#[async_trait]
impl NetworkDriver for VirtualNetwork {
    fn kind(&self) -> &str {
        NETWORK_KIND
    }

    async fn dial(&self, info: &ConnectionInfo) -> Result<Box<dyn Connection>, TransportError> {
        self.plant.dial(&info.address)?;
        tracing::debug!(address = %info.address, "virtual hub dialed");
        Ok(Box::new(VirtualConnection {
            plant: self.plant.clone(),
            address: info.address.clone(),
        }))
    }
}

struct VirtualConnection {
    plant: VirtualPlant,
    address: String,
}

#[async_trait]
impl Connection for VirtualConnection {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let line = std::str::from_utf8(frame)
            .map_err(|err| TransportError::Protocol(err.to_string()))?;
        self.plant.receive(&self.address, line)
    }

    async fn is_alive(&mut self) -> bool {
        self.plant.is_online(&self.address)
    }
}

/// Registers the virtual builder and a network bound to `plant`.
#[derive(Debug, Clone, Default)]
pub struct VirtualExtension {
    plant: VirtualPlant,
}

impl VirtualExtension {
    #[must_use]
    pub fn new(plant: VirtualPlant) -> Self {
        Self { plant }
    }

    #[must_use]
    pub fn plant(&self) -> &VirtualPlant {
        &self.plant
    }
}

impl Extension for VirtualExtension {
    fn name(&self) -> &str {
        "virtual"
    }

    fn register(&self, registry: &mut ExtensionRegistry) -> Result<(), RegistrationError> {
        registry.register_builder(Arc::new(VirtualBuilder))?;
        registry.register_network(Arc::new(VirtualNetwork {
            plant: self.plant.clone(),
        }))
    }
}

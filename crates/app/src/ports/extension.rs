//! Extension ports: how vendor adapters plug into the dispatch core.
//!
//! An [`Extension`] registers one or more [`CommandBuilder`]s (keyed by
//! device model id) and [`NetworkDriver`]s (keyed by network kind) into the
//! [`ExtensionRegistry`](crate::extensions::ExtensionRegistry). Adding new
//! hardware never requires touching the processor.

use async_trait::async_trait;

use homehub_domain::command::Command;
use homehub_domain::device::ConnectionInfo;
use homehub_domain::error::CommandError;

use crate::extensions::{ExtensionRegistry, RegistrationError};
use crate::ports::transport::{Connection, TransportError};
use crate::registry::Catalog;

/// Translates logical commands for one device model into wire writes.
pub trait CommandBuilder: Send + Sync {
    /// Model id this builder handles, e.g. `"l-bdgpro2-wh"`.
    fn id(&self) -> &str;

    /// Prepare the writes for `command`.
    ///
    /// `catalog` is the registry snapshot taken at dispatch time.
    ///
    /// # Errors
    ///
    /// Returns an `Unsupported` [`CommandError`] when the command has no
    /// encoding for this model.
    fn build(&self, command: &Command, catalog: &Catalog) -> Result<Box<dyn Emitter>, CommandError>;
}

/// A prepared write bound to nothing until a connection is supplied.
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, conn: &mut dyn Connection) -> Result<(), TransportError>;
}

/// An emitter writing a fixed sequence of frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frames(pub Vec<Vec<u8>>);

impl Frames {
    #[must_use]
    pub fn one(frame: impl Into<Vec<u8>>) -> Self {
        Self(vec![frame.into()])
    }
}

#[async_trait]
impl Emitter for Frames {
    async fn emit(&self, conn: &mut dyn Connection) -> Result<(), TransportError> {
        for frame in &self.0 {
            conn.send(frame).await?;
        }
        Ok(())
    }
}

/// The dialing half of a network kind.
#[async_trait]
pub trait NetworkDriver: Send + Sync {
    /// Network kind, matched against [`ConnectionInfo::network`].
    fn kind(&self) -> &str;

    async fn dial(&self, info: &ConnectionInfo) -> Result<Box<dyn Connection>, TransportError>;
}

/// A bundle of builders and drivers registered at startup.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`RegistrationError`] if a model id or network kind is
    /// already taken.
    fn register(&self, registry: &mut ExtensionRegistry) -> Result<(), RegistrationError>;
}

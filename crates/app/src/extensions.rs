//! Extension registry: model id → [`CommandBuilder`], network kind →
//! [`NetworkDriver`].
//!
//! Populated once at startup by [`Extension`]s and then frozen inside the
//! [`System`](crate::system::System).

use std::collections::HashMap;
use std::sync::Arc;

use crate::ports::{CommandBuilder, Extension, NetworkDriver};

/// A model id or network kind registered twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("a command builder is already registered for model {0}")]
    DuplicateBuilder(String),

    #[error("a network driver is already registered for kind {0}")]
    DuplicateNetwork(String),
}

#[derive(Default)]
pub struct ExtensionRegistry {
    builders: HashMap<String, Arc<dyn CommandBuilder>>,
    networks: HashMap<String, Arc<dyn NetworkDriver>>,
    extensions: Vec<String>,
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("builders", &self.builders.keys().collect::<Vec<_>>())
            .field("networks", &self.networks.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl ExtensionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `extension` register its builders and drivers. Either all of
    /// them are added or none is.
    ///
    /// # Errors
    ///
    /// Propagates the extension's [`RegistrationError`], or reports the first
    /// model id or network kind that is already taken.
    pub fn load(&mut self, extension: &dyn Extension) -> Result<(), RegistrationError> {
        let mut staged = Self::new();
        extension.register(&mut staged)?;
        if let Some(id) = staged.builders.keys().find(|id| self.builders.contains_key(*id)) {
            return Err(RegistrationError::DuplicateBuilder(id.clone()));
        }
        if let Some(kind) = staged.networks.keys().find(|kind| self.networks.contains_key(*kind)) {
            return Err(RegistrationError::DuplicateNetwork(kind.clone()));
        }
        self.builders.extend(staged.builders);
        self.networks.extend(staged.networks);
        tracing::info!(extension = extension.name(), "extension loaded");
        self.extensions.push(extension.name().to_string());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateBuilder`] if the model id is taken.
    pub fn register_builder(
        &mut self,
        builder: Arc<dyn CommandBuilder>,
    ) -> Result<(), RegistrationError> {
        let id = builder.id().to_string();
        if self.builders.contains_key(&id) {
            return Err(RegistrationError::DuplicateBuilder(id));
        }
        tracing::debug!(model = %id, "command builder registered");
        self.builders.insert(id, builder);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateNetwork`] if the kind is taken.
    pub fn register_network(
        &mut self,
        driver: Arc<dyn NetworkDriver>,
    ) -> Result<(), RegistrationError> {
        let kind = driver.kind().to_string();
        if self.networks.contains_key(&kind) {
            return Err(RegistrationError::DuplicateNetwork(kind));
        }
        tracing::debug!(network = %kind, "network driver registered");
        self.networks.insert(kind, driver);
        Ok(())
    }

    #[must_use]
    pub fn builder(&self, model_id: &str) -> Option<Arc<dyn CommandBuilder>> {
        self.builders.get(model_id).cloned()
    }

    #[must_use]
    pub fn network(&self, kind: &str) -> Option<Arc<dyn NetworkDriver>> {
        self.networks.get(kind).cloned()
    }

    /// Names of the loaded extensions, in load order.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

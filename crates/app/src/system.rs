//! The top-level handle owning every runtime component of the hub.
//!
//! There are no globals: hosts build one [`System`] and pass it (or the
//! pieces it hands out) to whatever needs it.

use std::sync::Arc;

use homehub_domain::button::Button;
use homehub_domain::device::{Device, Feature};
use homehub_domain::error::HubError;
use homehub_domain::id::{ButtonId, DeviceId, SceneId, ZoneId};
use homehub_domain::scene::Scene;
use homehub_domain::zone::Zone;

use crate::event_bus::{EventBus, EventStream};
use crate::extensions::{ExtensionRegistry, RegistrationError};
use crate::pool::{PoolConfig, PoolSet};
use crate::ports::{Extension, Mutation, MutationObserver, NoopObserver};
use crate::processor::{CommandProcessor, ProcessorConfig};
use crate::recipe::builtin::CoreCookBook;
use crate::recipe::{ActionContext, CookBookProvider, RecipeManager};
use crate::registry::{Catalog, DeviceRegistry};

/// Tunables of every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemConfig {
    pub processor: ProcessorConfig,
    pub pool: PoolConfig,
    /// Per-subscriber event buffer.
    pub event_buffer: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorConfig::default(),
            pool: PoolConfig::default(),
            event_buffer: EventBus::DEFAULT_CAPACITY,
        }
    }
}

#[must_use]
pub struct SystemBuilder {
    config: SystemConfig,
    extensions: ExtensionRegistry,
    cookbooks: Vec<Arc<dyn CookBookProvider>>,
    observer: Arc<dyn MutationObserver>,
}

impl SystemBuilder {
    pub fn config(mut self, config: SystemConfig) -> Self {
        self.config = config;
        self
    }

    /// Load an extension's builders and network drivers.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if a model id or network kind is
    /// already taken.
    pub fn extension(mut self, extension: &dyn Extension) -> Result<Self, RegistrationError> {
        self.extensions.load(extension)?;
        Ok(self)
    }

    /// Add a cookbook next to the core one.
    pub fn cookbook(mut self, cookbook: Arc<dyn CookBookProvider>) -> Self {
        self.cookbooks.push(cookbook);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn MutationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Start the processor. Must be called within a tokio runtime.
    pub fn build(self) -> System {
        let config = self.config;
        let extensions = Arc::new(self.extensions);
        let registry = Arc::new(DeviceRegistry::new());
        let bus = EventBus::new(config.event_buffer);
        let pools = Arc::new(PoolSet::new(
            Arc::clone(&extensions),
            bus.clone(),
            config.pool,
        ));
        let processor = Arc::new(CommandProcessor::start(
            Arc::clone(&registry),
            Arc::clone(&extensions),
            Arc::clone(&pools),
            bus.clone(),
            config.processor,
        ));
        let recipes = RecipeManager::new(
            self.cookbooks,
            bus.clone(),
            ActionContext {
                registry: Arc::clone(&registry),
                processor: Arc::clone(&processor),
            },
            Arc::clone(&self.observer),
        );
        tracing::info!(extensions = ?extensions.extensions(), "system started");
        System {
            registry,
            extensions,
            bus,
            pools,
            processor,
            recipes,
            observer: self.observer,
        }
    }
}

pub struct System {
    registry: Arc<DeviceRegistry>,
    extensions: Arc<ExtensionRegistry>,
    bus: EventBus,
    pools: Arc<PoolSet>,
    processor: Arc<CommandProcessor>,
    recipes: RecipeManager,
    observer: Arc<dyn MutationObserver>,
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("extensions", &self.extensions)
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

impl System {
    /// A builder carrying the core cookbook and no persistence.
    pub fn builder() -> SystemBuilder {
        SystemBuilder {
            config: SystemConfig::default(),
            extensions: ExtensionRegistry::new(),
            cookbooks: vec![Arc::new(CoreCookBook::new())],
            observer: Arc::new(NoopObserver),
        }
    }

    #[must_use]
    pub fn processor(&self) -> &Arc<CommandProcessor> {
        &self.processor
    }

    #[must_use]
    pub fn recipes(&self) -> &RecipeManager {
        &self.recipes
    }

    #[must_use]
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    #[must_use]
    pub fn pools(&self) -> &PoolSet {
        &self.pools
    }

    /// Every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Consistent view of the whole home.
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        self.registry.snapshot()
    }

    #[must_use]
    pub fn device(&self, id: DeviceId) -> Option<Device> {
        self.registry.snapshot().device(id).cloned()
    }

    #[must_use]
    pub fn zone(&self, id: ZoneId) -> Option<Zone> {
        self.registry.snapshot().zone(id).cloned()
    }

    #[must_use]
    pub fn button(&self, id: ButtonId) -> Option<Button> {
        self.registry.snapshot().button(id).cloned()
    }

    #[must_use]
    pub fn scene(&self, id: SceneId) -> Option<Scene> {
        self.registry.snapshot().scene(id).cloned()
    }

    /// Used by discovery and import to skip devices the hub already knows.
    #[must_use]
    pub fn is_dupe_device(&self, device: &Device) -> bool {
        self.registry.snapshot().is_dupe_device(device)
    }

    #[must_use]
    pub fn is_dupe_feature(&self, device_id: DeviceId, feature: &Feature) -> bool {
        self.registry.snapshot().is_dupe_feature(device_id, feature)
    }

    /// # Errors
    ///
    /// Registry validation errors, or the observer's error.
    pub async fn add_device(&self, device: Device) -> Result<(), HubError> {
        self.registry.add_device(device.clone())?;
        self.observer.on_mutation(&Mutation::DeviceSaved(device)).await
    }

    /// Remove a device together with its zones and buttons.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] for an unknown id, or the observer's error.
    pub async fn remove_device(&self, id: DeviceId) -> Result<Device, HubError> {
        let device = self.registry.remove_device(id)?;
        self.observer.on_mutation(&Mutation::DeviceRemoved(id)).await?;
        Ok(device)
    }

    /// # Errors
    ///
    /// Registry validation errors, or the observer's error.
    pub async fn add_zone(&self, zone: Zone) -> Result<(), HubError> {
        self.registry.add_zone(zone.clone())?;
        self.observer.on_mutation(&Mutation::ZoneSaved(zone)).await
    }

    /// # Errors
    ///
    /// [`HubError::NotFound`] for an unknown id, or the observer's error.
    pub async fn remove_zone(&self, id: ZoneId) -> Result<Zone, HubError> {
        let zone = self.registry.remove_zone(id)?;
        self.observer.on_mutation(&Mutation::ZoneRemoved(id)).await?;
        Ok(zone)
    }

    /// # Errors
    ///
    /// Registry validation errors, or the observer's error.
    pub async fn add_button(&self, button: Button) -> Result<(), HubError> {
        self.registry.add_button(button.clone())?;
        self.observer.on_mutation(&Mutation::ButtonSaved(button)).await
    }

    /// # Errors
    ///
    /// [`HubError::NotFound`] for an unknown id, or the observer's error.
    pub async fn remove_button(&self, id: ButtonId) -> Result<Button, HubError> {
        let button = self.registry.remove_button(id)?;
        self.observer.on_mutation(&Mutation::ButtonRemoved(id)).await?;
        Ok(button)
    }

    /// Insert or replace a scene.
    ///
    /// # Errors
    ///
    /// Scene validation errors, or the observer's error.
    pub async fn add_scene(&self, scene: Scene) -> Result<(), HubError> {
        self.registry.add_scene(scene.clone())?;
        self.observer.on_mutation(&Mutation::SceneSaved(scene)).await
    }

    /// # Errors
    ///
    /// [`HubError::NotFound`] for an unknown id, or the observer's error.
    pub async fn remove_scene(&self, id: SceneId) -> Result<Scene, HubError> {
        let scene = self.registry.remove_scene(id)?;
        self.observer.on_mutation(&Mutation::SceneRemoved(id)).await?;
        Ok(scene)
    }

    /// Hand the whole home and every recipe to the observer again.
    ///
    /// Devices come before their zones and buttons, hubs before their
    /// children.
    ///
    /// # Errors
    ///
    /// Stops at the first observer error.
    #[tracing::instrument(skip(self))]
    pub async fn save(&self) -> Result<(), HubError> {
        let catalog = self.registry.snapshot();
        let mut devices: Vec<&Device> = catalog.devices().collect();
        devices.sort_by_key(|device| !device.is_hub());

        let mut mutations: Vec<Mutation> = devices
            .into_iter()
            .map(|device| Mutation::DeviceSaved(device.clone()))
            .collect();
        mutations.extend(catalog.zones().cloned().map(Mutation::ZoneSaved));
        mutations.extend(catalog.buttons().cloned().map(Mutation::ButtonSaved));
        mutations.extend(catalog.scenes().cloned().map(Mutation::SceneSaved));
        mutations.extend(self.recipes.recipes().into_iter().map(Mutation::RecipeSaved));

        for mutation in &mutations {
            self.observer.on_mutation(mutation).await?;
        }
        tracing::info!(mutations = mutations.len(), "system saved");
        Ok(())
    }

    /// Stop recipes, drain the processor, then close every pool.
    ///
    /// When this returns no task holds a pool connection.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.recipes.shutdown().await;
        self.processor.shutdown().await;
        self.pools.close_all().await;
        tracing::info!("system stopped");
    }
}

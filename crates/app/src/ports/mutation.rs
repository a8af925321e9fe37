//! Persistence port: the host is told about every change that must survive
//! a restart.
//!
//! The core never retries a failed observer call; the error is returned to
//! whoever triggered the mutation.

use async_trait::async_trait;

use homehub_domain::button::Button;
use homehub_domain::device::Device;
use homehub_domain::error::HubError;
use homehub_domain::id::{ButtonId, DeviceId, RecipeId, SceneId, ZoneId};
use homehub_domain::recipe::RecipeDefinition;
use homehub_domain::scene::Scene;
use homehub_domain::zone::Zone;

/// A persisted change.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    DeviceSaved(Device),
    DeviceRemoved(DeviceId),
    ZoneSaved(Zone),
    ZoneRemoved(ZoneId),
    ButtonSaved(Button),
    ButtonRemoved(ButtonId),
    SceneSaved(Scene),
    SceneRemoved(SceneId),
    /// A recipe was registered or its enabled flag changed.
    RecipeSaved(RecipeDefinition),
    RecipeDeleted(RecipeId),
}

#[async_trait]
pub trait MutationObserver: Send + Sync {
    /// # Errors
    ///
    /// Returns [`HubError::Storage`] when the host failed to persist.
    async fn on_mutation(&self, mutation: &Mutation) -> Result<(), HubError>;
}

/// Observer for hosts without persistence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl MutationObserver for NoopObserver {
    async fn on_mutation(&self, _mutation: &Mutation) -> Result<(), HubError> {
        Ok(())
    }
}

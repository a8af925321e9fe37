//! JSON home store.
//!
//! The whole home (devices, zones, buttons, scenes and recipe definitions)
//! lives in one JSON document. Every mutation reported by the core is
//! applied to the in-memory copy, which is then written to a temporary
//! file and renamed over the previous document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use homehub_app::ports::{Mutation, MutationObserver};
use homehub_app::system::System;
use homehub_domain::button::Button;
use homehub_domain::device::{Device, FeatureKind};
use homehub_domain::error::HubError;
use homehub_domain::id::{ButtonId, DeviceId, RecipeId, SceneId, ZoneId};
use homehub_domain::recipe::RecipeDefinition;
use homehub_domain::scene::Scene;
use homehub_domain::zone::Zone;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access store file")]
    Io(#[from] std::io::Error),

    #[error("malformed store document")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        Self::Storage(Box::new(err))
    }
}

/// Persisted form of the home.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeDocument {
    pub devices: BTreeMap<DeviceId, Device>,
    pub zones: BTreeMap<ZoneId, Zone>,
    pub buttons: BTreeMap<ButtonId, Button>,
    pub scenes: BTreeMap<SceneId, Scene>,
    pub recipes: BTreeMap<RecipeId, RecipeDefinition>,
}

/// What [`HomeDocument::restore`] brought back.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Restored {
    pub devices: usize,
    pub zones: usize,
    pub buttons: usize,
    pub scenes: usize,
    pub recipes: usize,
    /// Recipes whose definition no longer unmarshals.
    pub skipped_recipes: usize,
}

impl HomeDocument {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.scenes.is_empty() && self.recipes.is_empty()
    }

    fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::DeviceSaved(device) => {
                self.devices.insert(device.id, device.clone());
            }
            Mutation::DeviceRemoved(id) => {
                self.devices.remove(id);
                self.devices.retain(|_, device| device.hub_id != Some(*id));
                let devices = &self.devices;
                self.zones.retain(|_, zone| devices.contains_key(&zone.device_id));
                self.buttons
                    .retain(|_, button| devices.contains_key(&button.device_id));
            }
            Mutation::ZoneSaved(zone) => {
                self.zones.insert(zone.id, zone.clone());
            }
            Mutation::ZoneRemoved(id) => {
                self.zones.remove(id);
            }
            Mutation::ButtonSaved(button) => {
                self.buttons.insert(button.id, button.clone());
            }
            Mutation::ButtonRemoved(id) => {
                self.buttons.remove(id);
            }
            Mutation::SceneSaved(scene) => {
                self.scenes.insert(scene.id, scene.clone());
            }
            Mutation::SceneRemoved(id) => {
                self.scenes.remove(id);
            }
            Mutation::RecipeSaved(definition) => {
                self.recipes.insert(definition.id, definition.clone());
            }
            Mutation::RecipeDeleted(id) => {
                self.recipes.remove(id);
            }
        }
    }

    /// Replay the document into `system`: hubs, child devices, zones,
    /// buttons, scenes, then recipes.
    ///
    /// Zone and button features are rebuilt by the registry, so the stored
    /// copies on devices are dropped. A recipe whose definition no longer
    /// unmarshals is skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns the first registry or observer error.
    pub async fn restore(self, system: &System) -> Result<Restored, HubError> {
        let mut restored = Restored::default();

        let mut devices: Vec<Device> = self.devices.into_values().collect();
        devices.sort_by_key(|device| !device.is_hub());
        for mut device in devices {
            device
                .features
                .retain(|feature| matches!(feature.kind, FeatureKind::Sensor));
            system.add_device(device).await?;
            restored.devices += 1;
        }
        for zone in self.zones.into_values() {
            system.add_zone(zone).await?;
            restored.zones += 1;
        }
        for button in self.buttons.into_values() {
            system.add_button(button).await?;
            restored.buttons += 1;
        }
        for scene in self.scenes.into_values() {
            system.add_scene(scene).await?;
            restored.scenes += 1;
        }
        for definition in self.recipes.into_values() {
            let name = definition.name.clone();
            match system.recipes().from_definition(definition) {
                Ok(recipe) => {
                    system.recipes().register_and_start(recipe).await?;
                    restored.recipes += 1;
                }
                Err(err) => {
                    tracing::warn!(recipe = %name, error = %err, "skipping stored recipe");
                    restored.skipped_recipes += 1;
                }
            }
        }
        Ok(restored)
    }
}

/// [`MutationObserver`] persisting the home to a JSON file.
#[derive(Debug)]
pub struct HomeStore {
    path: PathBuf,
    document: Mutex<HomeDocument>,
}

impl HomeStore {
    /// Read the document at `path`; a missing file is an empty home.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let document = match tokio::fs::read(&path).await {
            Ok(content) => serde_json::from_slice(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HomeDocument::default(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(path = %path.display(), "home store opened");
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the current document.
    pub async fn document(&self) -> HomeDocument {
        self.document.lock().await.clone()
    }

    async fn persist(&self, document: &HomeDocument) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(document)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl MutationObserver for HomeStore {
    async fn on_mutation(&self, mutation: &Mutation) -> Result<(), HubError> {
        let mut document = self.document.lock().await;
        document.apply(mutation);
        self.persist(&document).await?;
        Ok(())
    }
}

//! Device registry: the in-memory home model.
//!
//! Readers take a cheap [`Arc`] snapshot of an immutable [`Catalog`]; the
//! single writer clones the catalog, applies a change, validates it and
//! swaps the new snapshot in. Dispatch therefore never blocks on registry
//! writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use homehub_domain::button::Button;
use homehub_domain::command::Command;
use homehub_domain::device::{Device, Feature, FeatureKind};
use homehub_domain::error::{HubError, NotFoundError, ValidationError};
use homehub_domain::id::{ButtonId, DeviceId, SceneId, ZoneId};
use homehub_domain::scene::Scene;
use homehub_domain::zone::Zone;

/// An immutable view of devices, zones, buttons and scenes.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    devices: HashMap<DeviceId, Device>,
    zones: HashMap<ZoneId, Zone>,
    buttons: HashMap<ButtonId, Button>,
    scenes: HashMap<SceneId, Scene>,
}

impl Catalog {
    #[must_use]
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    #[must_use]
    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(&id)
    }

    #[must_use]
    pub fn button(&self, id: ButtonId) -> Option<&Button> {
        self.buttons.get(&id)
    }

    #[must_use]
    pub fn scene(&self, id: SceneId) -> Option<&Scene> {
        self.scenes.get(&id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.buttons.values()
    }

    pub fn scenes(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.values()
    }

    /// The hub whose transport carries traffic for `device`.
    #[must_use]
    pub fn hub_of<'a>(&'a self, device: &'a Device) -> Option<&'a Device> {
        match device.hub_id {
            None => Some(device),
            Some(hub_id) => self.devices.get(&hub_id),
        }
    }

    /// Children of a hub, in no particular order.
    pub fn children_of(&self, hub_id: DeviceId) -> impl Iterator<Item = &Device> {
        self.devices
            .values()
            .filter(move |d| d.hub_id == Some(hub_id))
    }

    /// Button `address` on `device`, if it is registered.
    #[must_use]
    pub fn button_at(&self, device_id: DeviceId, address: &str) -> Option<&Button> {
        self.buttons
            .values()
            .find(|b| b.device_id == device_id && b.address == address)
    }

    /// Whether a hub with the same connection address, or a child with the
    /// same hub, model and local id, is already known. Used to filter discovery and
    /// import results.
    #[must_use]
    pub fn is_dupe_device(&self, candidate: &Device) -> bool {
        self.devices.values().any(|existing| {
            if existing.id == candidate.id {
                return true;
            }
            let same_address = match (&existing.connection, &candidate.connection) {
                (Some(a), Some(b)) => a.network == b.network && a.address == b.address,
                _ => false,
            };
            let same_local = candidate.hub_id.is_some()
                && !candidate.local_id.is_empty()
                && existing.hub_id == candidate.hub_id
                && existing.model_number == candidate.model_number
                && existing.local_id == candidate.local_id;
            same_address || same_local
        })
    }

    /// Whether `device_id` already exposes a feature at `feature.address`.
    #[must_use]
    pub fn is_dupe_feature(&self, device_id: DeviceId, feature: &Feature) -> bool {
        self.devices
            .get(&device_id)
            .is_some_and(|d| d.feature(&feature.address).is_some())
    }

    fn require_device(&self, id: DeviceId) -> Result<&Device, NotFoundError> {
        self.devices.get(&id).ok_or_else(|| NotFoundError {
            entity: "Device",
            id: id.to_string(),
        })
    }
}

/// Mutex-serialized writer, snapshot readers.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    current: RwLock<Arc<Catalog>>,
    writer: Mutex<()>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current catalog. Later writes do not affect the returned snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Catalog> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    fn update<T>(
        &self,
        change: impl FnOnce(&mut Catalog) -> Result<T, HubError>,
    ) -> Result<T, HubError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Catalog::clone(&self.snapshot());
        let value = change(&mut next)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(value)
    }

    /// Insert a device. A child device's hub must already be registered.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid or duplicate device and
    /// [`HubError::NotFound`] when the referenced hub is unknown.
    pub fn add_device(&self, device: Device) -> Result<(), HubError> {
        device.validate()?;
        self.update(|catalog| {
            if catalog.devices.contains_key(&device.id) {
                return Err(duplicate("Device", device.id));
            }
            if let Some(hub_id) = device.hub_id {
                let hub = catalog.require_device(hub_id)?;
                if !hub.is_hub() {
                    return Err(ValidationError::NoTransport.into());
                }
            }
            catalog.devices.insert(device.id, device);
            Ok(())
        })
    }

    /// Remove a device with its zones and buttons. Removing a hub also
    /// removes its children along with their zones and buttons.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown id.
    pub fn remove_device(&self, id: DeviceId) -> Result<Device, HubError> {
        self.update(|catalog| {
            let device = catalog.devices.remove(&id).ok_or_else(|| NotFoundError {
                entity: "Device",
                id: id.to_string(),
            })?;
            catalog.devices.retain(|_, d| d.hub_id != Some(id));
            let devices = &catalog.devices;
            catalog.zones.retain(|_, z| devices.contains_key(&z.device_id));
            catalog.buttons.retain(|_, b| devices.contains_key(&b.device_id));
            Ok(device)
        })
    }

    /// Insert a zone and record it as a feature of its device.
    ///
    /// # Errors
    ///
    /// Fails when the device is unknown or its address is already used.
    pub fn add_zone(&self, zone: Zone) -> Result<(), HubError> {
        zone.validate()?;
        self.update(|catalog| {
            if catalog.zones.contains_key(&zone.id) {
                return Err(duplicate("Zone", zone.id));
            }
            let device = catalog
                .devices
                .get_mut(&zone.device_id)
                .ok_or_else(|| NotFoundError {
                    entity: "Device",
                    id: zone.device_id.to_string(),
                })?;
            device.add_feature(Feature {
                address: zone.address.clone(),
                kind: FeatureKind::Zone(zone.id),
            })?;
            catalog.zones.insert(zone.id, zone);
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown id.
    pub fn remove_zone(&self, id: ZoneId) -> Result<Zone, HubError> {
        self.update(|catalog| {
            let zone = catalog.zones.remove(&id).ok_or_else(|| NotFoundError {
                entity: "Zone",
                id: id.to_string(),
            })?;
            if let Some(device) = catalog.devices.get_mut(&zone.device_id) {
                device.features.retain(|f| f.kind != FeatureKind::Zone(id));
            }
            Ok(zone)
        })
    }

    /// Insert a button and record it as a feature of its device.
    ///
    /// # Errors
    ///
    /// Fails when the device is unknown or its address is already used.
    pub fn add_button(&self, button: Button) -> Result<(), HubError> {
        self.update(|catalog| {
            if catalog.buttons.contains_key(&button.id) {
                return Err(duplicate("Button", button.id));
            }
            let device = catalog
                .devices
                .get_mut(&button.device_id)
                .ok_or_else(|| NotFoundError {
                    entity: "Device",
                    id: button.device_id.to_string(),
                })?;
            device.add_feature(Feature {
                address: button.address.clone(),
                kind: FeatureKind::Button(button.id),
            })?;
            catalog.buttons.insert(button.id, button);
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown id.
    pub fn remove_button(&self, id: ButtonId) -> Result<Button, HubError> {
        self.update(|catalog| {
            let button = catalog.buttons.remove(&id).ok_or_else(|| NotFoundError {
                entity: "Button",
                id: id.to_string(),
            })?;
            if let Some(device) = catalog.devices.get_mut(&button.device_id) {
                device.features.retain(|f| f.kind != FeatureKind::Button(id));
            }
            Ok(button)
        })
    }

    /// Insert or replace a scene.
    ///
    /// Nested `SceneSet` commands may refer to scenes registered later;
    /// they are resolved when the scene is expanded.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid scene.
    pub fn add_scene(&self, scene: Scene) -> Result<(), HubError> {
        scene.validate()?;
        self.update(|catalog| {
            catalog.scenes.insert(scene.id, scene);
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown id.
    pub fn remove_scene(&self, id: SceneId) -> Result<Scene, HubError> {
        self.update(|catalog| {
            catalog.scenes.remove(&id).ok_or_else(|| {
                NotFoundError {
                    entity: "Scene",
                    id: id.to_string(),
                }
                .into()
            })
        })
    }
}

fn duplicate(entity: &'static str, id: impl ToString) -> HubError {
    ValidationError::Duplicate {
        entity,
        id: id.to_string(),
    }
    .into()
}

/// Whether every entity a command names is known to `catalog`.
///
/// # Errors
///
/// Returns the first missing entity.
pub fn resolve(command: &Command, catalog: &Catalog) -> Result<(), NotFoundError> {
    match command {
        Command::ZoneSetLevel { zone, .. }
        | Command::ZoneTurnOn { zone }
        | Command::ZoneTurnOff { zone } => {
            catalog.zone(zone.zone_id).ok_or_else(|| NotFoundError {
                entity: "Zone",
                id: zone.zone_id.to_string(),
            })?;
            catalog.require_device(zone.device_id)?;
        }
        Command::ButtonPress { button } | Command::ButtonRelease { button } => {
            catalog.require_device(button.device_id)?;
        }
        Command::SceneSet { scene_id, .. } => {
            catalog.scene(*scene_id).ok_or_else(|| NotFoundError {
                entity: "Scene",
                id: scene_id.to_string(),
            })?;
        }
    }
    Ok(())
}

//! Command: the closed set of logical intents the core can dispatch.
//!
//! Commands carry denormalized identifiers (addresses, owning device ids,
//! display names) captured when they are built, so dispatch can proceed
//! without holding the registry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::button::Button;
use crate::device::Device;
use crate::id::{DeviceId, SceneId, ZoneId};
use crate::level::Level;
use crate::scene::Scene;
use crate::zone::Zone;

/// The zone a command addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTarget {
    pub zone_id: ZoneId,
    pub device_id: DeviceId,
    pub address: String,
    pub name: String,
}

impl From<&Zone> for ZoneTarget {
    fn from(zone: &Zone) -> Self {
        Self {
            zone_id: zone.id,
            device_id: zone.device_id,
            address: zone.address.clone(),
            name: zone.name.clone(),
        }
    }
}

/// The button a command addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonTarget {
    pub device_id: DeviceId,
    /// Local id of the keypad/remote on its hub.
    pub device_address: String,
    pub button_address: String,
}

/// A logical intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    ZoneSetLevel { zone: ZoneTarget, level: Level },
    ZoneTurnOn { zone: ZoneTarget },
    ZoneTurnOff { zone: ZoneTarget },
    ButtonPress { button: ButtonTarget },
    ButtonRelease { button: ButtonTarget },
    SceneSet { scene_id: SceneId, scene_name: String },
}

/// Discriminant of a [`Command`], used in outcome events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    ZoneSetLevel,
    ZoneTurnOn,
    ZoneTurnOff,
    ButtonPress,
    ButtonRelease,
    SceneSet,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ZoneSetLevel => "zone_set_level",
            Self::ZoneTurnOn => "zone_turn_on",
            Self::ZoneTurnOff => "zone_turn_off",
            Self::ButtonPress => "button_press",
            Self::ButtonRelease => "button_release",
            Self::SceneSet => "scene_set",
        })
    }
}

impl Command {
    #[must_use]
    pub fn set_level(zone: &Zone, level: Level) -> Self {
        Self::ZoneSetLevel {
            zone: zone.into(),
            level,
        }
    }

    #[must_use]
    pub fn turn_on(zone: &Zone) -> Self {
        Self::ZoneTurnOn { zone: zone.into() }
    }

    #[must_use]
    pub fn turn_off(zone: &Zone) -> Self {
        Self::ZoneTurnOff { zone: zone.into() }
    }

    #[must_use]
    pub fn press(device: &Device, button: &Button) -> Self {
        Self::ButtonPress {
            button: button_target(device, button),
        }
    }

    #[must_use]
    pub fn release(device: &Device, button: &Button) -> Self {
        Self::ButtonRelease {
            button: button_target(device, button),
        }
    }

    #[must_use]
    pub fn activate(scene: &Scene) -> Self {
        Self::SceneSet {
            scene_id: scene.id,
            scene_name: scene.name.clone(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::ZoneSetLevel { .. } => CommandKind::ZoneSetLevel,
            Self::ZoneTurnOn { .. } => CommandKind::ZoneTurnOn,
            Self::ZoneTurnOff { .. } => CommandKind::ZoneTurnOff,
            Self::ButtonPress { .. } => CommandKind::ButtonPress,
            Self::ButtonRelease { .. } => CommandKind::ButtonRelease,
            Self::SceneSet { .. } => CommandKind::SceneSet,
        }
    }

    /// Device the command is addressed to. Scenes address no single device.
    #[must_use]
    pub fn target_device(&self) -> Option<DeviceId> {
        match self {
            Self::ZoneSetLevel { zone, .. }
            | Self::ZoneTurnOn { zone }
            | Self::ZoneTurnOff { zone } => Some(zone.device_id),
            Self::ButtonPress { button } | Self::ButtonRelease { button } => {
                Some(button.device_id)
            }
            Self::SceneSet { .. } => None,
        }
    }

    /// Local address on the target device (zone or button address).
    #[must_use]
    pub fn target_address(&self) -> Option<&str> {
        match self {
            Self::ZoneSetLevel { zone, .. }
            | Self::ZoneTurnOn { zone }
            | Self::ZoneTurnOff { zone } => Some(&zone.address),
            Self::ButtonPress { button } | Self::ButtonRelease { button } => {
                Some(&button.button_address)
            }
            Self::SceneSet { .. } => None,
        }
    }

    /// Normalize the zone variants onto a single level.
    ///
    /// `ZoneTurnOn` is `ZoneSetLevel(100)` and `ZoneTurnOff` is
    /// `ZoneSetLevel(0)`; builders encode through this so the wire output is
    /// identical for equivalent commands.
    #[must_use]
    pub fn zone_level(&self) -> Option<(&ZoneTarget, Level)> {
        match self {
            Self::ZoneSetLevel { zone, level } => Some((zone, *level)),
            Self::ZoneTurnOn { zone } => Some((zone, Level::FULL)),
            Self::ZoneTurnOff { zone } => Some((zone, Level::OFF)),
            _ => None,
        }
    }
}

fn button_target(device: &Device, button: &Button) -> ButtonTarget {
    ButtonTarget {
        device_id: device.id,
        device_address: device.local_id.clone(),
        button_address: button.address.clone(),
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZoneSetLevel { zone, level } => {
                write!(f, "zone_set_level({}, {level})", zone.name)
            }
            Self::ZoneTurnOn { zone } => write!(f, "zone_turn_on({})", zone.name),
            Self::ZoneTurnOff { zone } => write!(f, "zone_turn_off({})", zone.name),
            Self::ButtonPress { button } => write!(
                f,
                "button_press({}/{})",
                button.device_address, button.button_address
            ),
            Self::ButtonRelease { button } => write!(
                f,
                "button_release({}/{})",
                button.device_address, button.button_address
            ),
            Self::SceneSet { scene_name, .. } => write!(f, "scene_set({scene_name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ConnectionInfo;

    fn zone() -> Zone {
        Zone::builder()
            .name("Lamp")
            .address("7")
            .device_id(DeviceId::new())
            .build()
            .unwrap()
    }

    #[test]
    fn should_denormalize_zone_identity() {
        let zone = zone();
        let cmd = Command::set_level(&zone, Level::new(42.5).unwrap());
        assert_eq!(cmd.kind(), CommandKind::ZoneSetLevel);
        assert_eq!(cmd.target_device(), Some(zone.device_id));
        assert_eq!(cmd.target_address(), Some("7"));
    }

    #[test]
    fn should_normalize_turn_on_and_off_to_levels() {
        let zone = zone();
        let (_, on) = Command::turn_on(&zone).zone_level().unwrap();
        let (_, off) = Command::turn_off(&zone).zone_level().unwrap();
        assert_eq!(on, Level::FULL);
        assert_eq!(off, Level::OFF);
    }

    #[test]
    fn should_capture_device_address_for_buttons() {
        let hub = Device::builder()
            .name("Bridge")
            .model_number("m")
            .connection(ConnectionInfo::new("tcp", "x:1"))
            .build()
            .unwrap();
        let keypad = Device::builder()
            .name("Keypad")
            .local_id("4")
            .model_number("m")
            .hub(hub.id)
            .build()
            .unwrap();
        let button = Button::new(keypad.id, "2", "Top").unwrap();

        let cmd = Command::release(&keypad, &button);
        assert_eq!(cmd.kind(), CommandKind::ButtonRelease);
        assert_eq!(cmd.to_string(), "button_release(4/2)");
        assert!(cmd.zone_level().is_none());
    }

    #[test]
    fn should_target_no_device_for_scenes() {
        let scene = Scene::builder().name("Evening").build().unwrap();
        let cmd = Command::activate(&scene);
        assert_eq!(cmd.target_device(), None);
        assert_eq!(cmd.to_string(), "scene_set(Evening)");
    }

    #[test]
    fn should_tag_commands_by_type_in_json() {
        let cmd = Command::turn_on(&zone());
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "zone_turn_on");
        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }
}

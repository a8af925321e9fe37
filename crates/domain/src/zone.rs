//! Zone: a controllable output exposed by a device (a dimmer channel, a shade).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, ValidationError};
use crate::id::{DeviceId, ZoneId};

/// What kind of load a zone drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Light,
    Shade,
    Switch,
    #[default]
    Unknown,
}

/// Whether a zone accepts any level or only on/off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    #[default]
    Continuous,
    Binary,
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Light => "light",
            Self::Shade => "shade",
            Self::Switch => "switch",
            Self::Unknown => "unknown",
        })
    }
}

/// A controllable output on exactly one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    /// Address of the zone on its device.
    pub address: String,
    pub device_id: DeviceId,
    pub name: String,
    pub description: String,
    pub zone_type: ZoneType,
    pub output: Output,
}

impl Zone {
    /// Create a builder for constructing a [`Zone`].
    #[must_use]
    pub fn builder() -> ZoneBuilder {
        ZoneBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when `name` or `address` is empty.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.address.is_empty() {
            return Err(ValidationError::EmptyAddress.into());
        }
        Ok(())
    }
}

/// Step-by-step builder for [`Zone`].
#[derive(Debug, Default)]
pub struct ZoneBuilder {
    id: Option<ZoneId>,
    address: Option<String>,
    device_id: Option<DeviceId>,
    name: Option<String>,
    description: Option<String>,
    zone_type: ZoneType,
    output: Output,
}

impl ZoneBuilder {
    #[must_use]
    pub fn id(mut self, id: ZoneId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn device_id(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn zone_type(mut self, zone_type: ZoneType) -> Self {
        self.zone_type = zone_type;
        self
    }

    #[must_use]
    pub fn output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    /// Consume the builder, validate, and return a [`Zone`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] if required fields are missing.
    pub fn build(self) -> Result<Zone, HubError> {
        let zone = Zone {
            id: self.id.unwrap_or_default(),
            address: self.address.unwrap_or_default(),
            device_id: self.device_id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            zone_type: self.zone_type,
            output: self.output,
        };
        zone.validate()?;
        Ok(zone)
    }
}

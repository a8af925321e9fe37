//! Device: a physically addressable node, either a hub or a child of one.
//!
//! A hub terminates the wire protocol for itself and its children and
//! carries the [`ConnectionInfo`] used to dial it. A child only refers to
//! its hub by id; resolution happens at dispatch time.

use serde::{Deserialize, Serialize};

use crate::error::{HubError, ValidationError};
use crate::id::{ButtonId, DeviceId, ZoneId};

/// How to reach a hub device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Network driver kind, e.g. `"lutron"` or `"fluxwifi"`.
    pub network: String,
    /// Host and port, e.g. `"192.168.0.10:23"`.
    pub address: String,
    /// Optional login, for protocols that authenticate.
    #[serde(default)]
    pub login: Option<String>,
    /// Optional password or token.
    #[serde(default)]
    pub password: Option<String>,
    /// Maximum number of simultaneous connections to this hub.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    2
}

impl ConnectionInfo {
    /// Connection to `address` over the given network kind with default settings.
    #[must_use]
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
            login: None,
            password: None,
            pool_size: default_pool_size(),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

/// What a [`Feature`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum FeatureKind {
    Zone(ZoneId),
    Button(ButtonId),
    Sensor,
}

/// A capability exposed by a device at a local address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub address: String,
    pub kind: FeatureKind,
}

/// A physical or virtual node that can receive commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// User-assigned id, also the address used on the wire by child devices.
    pub local_id: String,
    pub name: String,
    pub description: String,
    /// Vendor model identifier, the key into the builder registry.
    pub model_number: String,
    /// Parent hub, absent when this device is itself a hub.
    pub hub_id: Option<DeviceId>,
    /// Present on hubs only.
    pub connection: Option<ConnectionInfo>,
    /// Ordered capabilities, unique by address.
    pub features: Vec<Feature>,
}

impl Device {
    /// Create a builder for constructing a [`Device`].
    #[must_use]
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    #[must_use]
    pub fn is_hub(&self) -> bool {
        self.hub_id.is_none()
    }

    /// Id of the device whose transport carries commands for this device.
    #[must_use]
    pub fn transport_owner(&self) -> DeviceId {
        self.hub_id.unwrap_or(self.id)
    }

    #[must_use]
    pub fn feature(&self, address: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.address == address)
    }

    /// Append a feature, rejecting a duplicate address.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DuplicateAddress`] if the address is taken.
    pub fn add_feature(&mut self, feature: Feature) -> Result<(), ValidationError> {
        if self.feature(&feature.address).is_some() {
            return Err(ValidationError::DuplicateAddress(feature.address));
        }
        self.features.push(feature);
        Ok(())
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - `model_number` is empty ([`ValidationError::EmptyModel`])
    /// - both or neither of hub/connection are set
    /// - the connection allows zero connections
    /// - two features share an address
    pub fn validate(&self) -> Result<(), HubError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.model_number.is_empty() {
            return Err(ValidationError::EmptyModel.into());
        }
        match (&self.hub_id, &self.connection) {
            (Some(_), Some(_)) => return Err(ValidationError::AmbiguousTransport.into()),
            (None, None) => return Err(ValidationError::NoTransport.into()),
            (None, Some(conn)) if conn.pool_size == 0 => {
                return Err(ValidationError::ZeroCapacity.into());
            }
            _ => {}
        }
        for (i, feature) in self.features.iter().enumerate() {
            if self.features[..i].iter().any(|f| f.address == feature.address) {
                return Err(ValidationError::DuplicateAddress(feature.address.clone()).into());
            }
        }
        Ok(())
    }
}

/// Step-by-step builder for [`Device`].
#[derive(Debug, Default)]
pub struct DeviceBuilder {
    id: Option<DeviceId>,
    local_id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    model_number: Option<String>,
    hub_id: Option<DeviceId>,
    connection: Option<ConnectionInfo>,
    features: Vec<Feature>,
}

impl DeviceBuilder {
    #[must_use]
    pub fn id(mut self, id: DeviceId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = Some(local_id.into());
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
    pub fn model_number(mut self, model_number: impl Into<String>) -> Self {
        self.model_number = Some(model_number.into());
        self
    }

    #[must_use]
    pub fn hub(mut self, hub_id: DeviceId) -> Self {
        self.hub_id = Some(hub_id);
        self
    }

    #[must_use]
    pub fn connection(mut self, connection: ConnectionInfo) -> Self {
        self.connection = Some(connection);
        self
    }

    #[must_use]
    pub fn feature(mut self, address: impl Into<String>, kind: FeatureKind) -> Self {
        self.features.push(Feature {
            address: address.into(),
            kind,
        });
        self
    }

    /// Consume the builder, validate, and return a [`Device`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] if required fields are missing or
    /// the hub/connection invariant does not hold.
    pub fn build(self) -> Result<Device, HubError> {
        let device = Device {
            id: self.id.unwrap_or_default(),
            local_id: self.local_id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            model_number: self.model_number.unwrap_or_default(),
            hub_id: self.hub_id,
            connection: self.connection,
            features: self.features,
        };
        device.validate()?;
        Ok(device)
    }
}

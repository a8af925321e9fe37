//! Button: a press-able feature of a keypad or remote.

use serde::{Deserialize, Serialize};

use crate::error::{HubError, ValidationError};
use crate::id::{ButtonId, DeviceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: ButtonId,
    /// Address of the button on its device.
    pub address: String,
    pub device_id: DeviceId,
    pub name: String,
}

impl Button {
    /// Create a validated button.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when `address` or `name` is empty.
    pub fn new(
        device_id: DeviceId,
        address: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, HubError> {
        let button = Self {
            id: ButtonId::new(),
            address: address.into(),
            device_id,
            name: name.into(),
        };
        if button.address.is_empty() {
            return Err(ValidationError::EmptyAddress.into());
        }
        if button.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        Ok(button)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_create_button_on_device() {
        let device = DeviceId::new();
        let button = Button::new(device, "2", "Top").unwrap();
        assert_eq!(button.device_id, device);
        assert_eq!(button.address, "2");
    }

    #[test]
    fn should_reject_empty_address() {
        assert!(matches!(
            Button::new(DeviceId::new(), "", "Top"),
            Err(HubError::Validation(ValidationError::EmptyAddress))
        ));
    }
}

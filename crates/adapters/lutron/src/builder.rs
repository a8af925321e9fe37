//! Command builder for the Lutron integration protocol.

use std::sync::OnceLock;

use homehub_app::ports::{CommandBuilder, Emitter, Frames};
use homehub_app::registry::Catalog;
use homehub_domain::command::Command;
use homehub_domain::error::CommandError;
use homehub_domain::level::Level;

use crate::error::LutronError;

/// Model number of the Smart Bridge Pro.
pub const SMART_BRIDGE_PRO: &str = "l-bdgpro2-wh";

/// Integration action numbers of `#DEVICE`.
const ACTION_PRESS: u8 = 3;
const ACTION_RELEASE: u8 = 4;

/// Wire dialect of one bridge model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dialect {
    /// `#OUTPUT` action that sets a level.
    set_level_action: u8,
}

impl Dialect {
    fn from_model_number(model: &str) -> Result<Self, LutronError> {
        match model {
            SMART_BRIDGE_PRO => Ok(Self { set_level_action: 1 }),
            other => Err(LutronError::UnknownModel(other.to_string())),
        }
    }

    fn set_level(self, address: &str, level: Level) -> String {
        format!(
            "#OUTPUT,{address},{},{:.2}\r\n",
            self.set_level_action,
            level.value()
        )
    }

    #[allow(clippy::unused_self)]
    fn button(self, device: &str, button: &str, action: u8) -> String {
        format!("#DEVICE,{device},{button},{action}\r\n")
    }
}

/// Builds `#OUTPUT` and `#DEVICE` lines.
///
/// The dialect is resolved from the model number on first use and cached.
#[derive(Debug)]
pub struct LutronBuilder {
    model: String,
    dialect: OnceLock<Result<Dialect, String>>,
}

impl LutronBuilder {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            dialect: OnceLock::new(),
        }
    }

    fn dialect(&self) -> Result<Dialect, CommandError> {
        self.dialect
            .get_or_init(|| Dialect::from_model_number(&self.model).map_err(|err| err.to_string()))
            .clone()
            .map_err(CommandError::unsupported)
    }
}

impl CommandBuilder for LutronBuilder {
    fn id(&self) -> &str {
        &self.model
    }

    fn build(&self, command: &Command, _catalog: &Catalog) -> Result<Box<dyn Emitter>, CommandError> {
        let dialect = self.dialect()?;
        let line = if let Some((zone, level)) = command.zone_level() {
            dialect.set_level(&zone.address, level)
        } else {
            match command {
                Command::ButtonPress { button } => {
                    dialect.button(&button.device_address, &button.button_address, ACTION_PRESS)
                }
                Command::ButtonRelease { button } => {
                    dialect.button(&button.device_address, &button.button_address, ACTION_RELEASE)
                }
                other => {
                    return Err(CommandError::unsupported(format!(
                        "lutron cannot encode {}",
                        other.kind()
                    )));
                }
            }
        };
        tracing::trace!(line = line.trim_end(), "lutron command built");
        Ok(Box::new(Frames::one(line)))
    }
}

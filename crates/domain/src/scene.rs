//! Scene: a named, ordered bundle of commands.

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::{HubError, ValidationError};
use crate::id::SceneId;

/// Maximum nesting of `SceneSet` commands during expansion.
pub const MAX_SCENE_DEPTH: usize = 8;

/// Activation is not transactional; each command is dispatched independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub name: String,
    pub description: String,
    pub commands: Vec<Command>,
}

impl Scene {
    /// Create a builder for constructing a [`Scene`].
    #[must_use]
    pub fn builder() -> SceneBuilder {
        SceneBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when the name is empty or the scene
    /// directly activates itself.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let self_ref = self.commands.iter().any(
            |cmd| matches!(cmd, Command::SceneSet { scene_id, .. } if *scene_id == self.id),
        );
        if self_ref {
            return Err(ValidationError::SelfReferencingScene.into());
        }
        Ok(())
    }
}

/// Step-by-step builder for [`Scene`].
#[derive(Debug, Default)]
pub struct SceneBuilder {
    id: Option<SceneId>,
    name: Option<String>,
    description: Option<String>,
    commands: Vec<Command>,
}

impl SceneBuilder {
    #[must_use]
    pub fn id(mut self, id: SceneId) -> Self {
        self.id = Some(id);
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
    pub fn command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Consume the builder, validate, and return a [`Scene`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] if the name is missing or the scene
    /// references itself.
    pub fn build(self) -> Result<Scene, HubError> {
        let scene = Scene {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            commands: self.commands,
        };
        scene.validate()?;
        Ok(scene)
    }
}

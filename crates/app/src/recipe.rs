//! Recipe runtime: live triggers and actions built from cookbook templates.
//!
//! A [`RecipeDefinition`] is inert data. A [`CookBookProvider`] turns its
//! trigger and action template references into a running [`Trigger`] and an
//! executable [`Action`]; the [`RecipeManager`] supervises the pair.

pub mod builtin;
pub mod manager;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use homehub_domain::cookbook::{CookBook, Ingredients};
use homehub_domain::error::HubError;
use homehub_domain::recipe::{RecipeDefinition, UnmarshalRecipeError};

use crate::event_bus::EventBus;
use crate::processor::CommandProcessor;
use crate::registry::DeviceRegistry;

pub use manager::RecipeManager;

/// One firing of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing {
    pub at: DateTime<Utc>,
}

impl Firing {
    #[must_use]
    pub fn now() -> Self {
        Self { at: Utc::now() }
    }
}

/// Firings of a started trigger. The stream ending means the trigger is done.
pub type FireStream = BoxStream<'static, Firing>;

/// Source of firings for a recipe.
pub trait Trigger: Send + Sync {
    /// Begin producing firings until `stop` is cancelled.
    fn start(&self, stop: CancellationToken) -> FireStream;

    /// A disabled trigger emits nothing but keeps its subscriptions.
    fn set_enabled(&self, enabled: bool);

    fn enabled(&self) -> bool;

    /// Request an immediate firing. Returns `false` for triggers that only
    /// fire on their own.
    fn fire(&self) -> bool {
        false
    }
}

/// What the actions of a recipe are allowed to reach.
#[derive(Clone)]
pub struct ActionContext {
    pub registry: Arc<DeviceRegistry>,
    pub processor: Arc<CommandProcessor>,
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action once. Entities are resolved at execution time.
    ///
    /// # Errors
    ///
    /// Returns the resolution or command failure.
    async fn execute(&self, ctx: &ActionContext) -> Result<(), HubError>;
}

/// A cookbook together with the constructors for its templates.
pub trait CookBookProvider: Send + Sync {
    fn cookbook(&self) -> &CookBook;

    /// # Errors
    ///
    /// `unknown_template` if `template_id` is not a trigger of this cookbook,
    /// `invalid_value` if an ingredient is well-typed but unusable.
    fn trigger(
        &self,
        template_id: &str,
        ingredients: &Ingredients,
        bus: &EventBus,
    ) -> Result<Arc<dyn Trigger>, UnmarshalRecipeError>;

    /// # Errors
    ///
    /// Same as [`CookBookProvider::trigger`], for action templates.
    fn action(
        &self,
        template_id: &str,
        ingredients: &Ingredients,
    ) -> Result<Arc<dyn Action>, UnmarshalRecipeError>;
}

/// A recipe whose trigger and action have been built but which is not
/// necessarily registered yet.
#[derive(Clone)]
pub struct Recipe {
    definition: RecipeDefinition,
    trigger: Arc<dyn Trigger>,
    action: Arc<dyn Action>,
}

impl std::fmt::Debug for Recipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recipe")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl Recipe {
    #[must_use]
    pub fn new(
        definition: RecipeDefinition,
        trigger: Arc<dyn Trigger>,
        action: Arc<dyn Action>,
    ) -> Self {
        trigger.set_enabled(definition.enabled);
        Self {
            definition,
            trigger,
            action,
        }
    }

    #[must_use]
    pub fn definition(&self) -> &RecipeDefinition {
        &self.definition
    }

    #[must_use]
    pub fn trigger(&self) -> &Arc<dyn Trigger> {
        &self.trigger
    }

    #[must_use]
    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }
}

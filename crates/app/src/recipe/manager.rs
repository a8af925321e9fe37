//! Recipe lifecycle: unmarshal, register, enable, delete, and the per-recipe
//! supervisor that turns firings into action runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use homehub_domain::cookbook::CookBook;
use homehub_domain::error::{CommandError, HubError, NotFoundError, ValidationError};
use homehub_domain::event::Event;
use homehub_domain::id::RecipeId;
use homehub_domain::recipe::{
    NewRecipe, RECIPE_VERSION, RecipeDefinition, TemplateRef, UnmarshalRecipeError,
};

use super::{Action, ActionContext, CookBookProvider, FireStream, Recipe, Trigger};
use crate::event_bus::EventBus;
use crate::ports::{Mutation, MutationObserver};

struct LiveRecipe {
    recipe: Recipe,
    enabled: Arc<AtomicBool>,
    /// Present once the trigger has been started.
    stop: Option<CancellationToken>,
}

impl LiveRecipe {
    fn definition(&self) -> RecipeDefinition {
        RecipeDefinition {
            enabled: self.enabled.load(Ordering::SeqCst),
            ..self.recipe.definition().clone()
        }
    }
}

/// Owns every registered recipe and its running trigger.
pub struct RecipeManager {
    cookbooks: Vec<Arc<dyn CookBookProvider>>,
    bus: EventBus,
    context: ActionContext,
    observer: Arc<dyn MutationObserver>,
    recipes: Mutex<HashMap<RecipeId, LiveRecipe>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl std::fmt::Debug for RecipeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeManager")
            .field("cookbooks", &self.cookbooks.len())
            .field("closing", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RecipeManager {
    #[must_use]
    pub fn new(
        cookbooks: Vec<Arc<dyn CookBookProvider>>,
        bus: EventBus,
        context: ActionContext,
        observer: Arc<dyn MutationObserver>,
    ) -> Self {
        Self {
            cookbooks,
            bus,
            context,
            observer,
            recipes: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Every known cookbook, in registration order.
    #[must_use]
    pub fn cookbooks(&self) -> Vec<CookBook> {
        self.cookbooks.iter().map(|p| p.cookbook().clone()).collect()
    }

    /// Build a new, unregistered recipe from its generic JSON description.
    ///
    /// # Errors
    ///
    /// Returns an [`UnmarshalRecipeError`] naming the first offending field
    /// or ingredient.
    pub fn unmarshal_new_recipe(
        &self,
        data: &serde_json::Value,
    ) -> Result<Recipe, UnmarshalRecipeError> {
        let new = NewRecipe::from_value(data)?;
        self.from_definition(RecipeDefinition {
            id: RecipeId::new(),
            name: new.name,
            description: new.description,
            version: RECIPE_VERSION.to_string(),
            enabled: new.enabled,
            trigger: new.trigger,
            action: new.action,
        })
    }

    /// Rebuild a recipe from a persisted definition.
    ///
    /// # Errors
    ///
    /// Same as [`RecipeManager::unmarshal_new_recipe`].
    pub fn from_definition(
        &self,
        definition: RecipeDefinition,
    ) -> Result<Recipe, UnmarshalRecipeError> {
        let trigger = self.build_trigger(&definition.trigger)?;
        let action = self.build_action(&definition.action)?;
        Ok(Recipe::new(definition, trigger, action))
    }

    fn build_trigger(
        &self,
        template: &TemplateRef,
    ) -> Result<Arc<dyn Trigger>, UnmarshalRecipeError> {
        for provider in &self.cookbooks {
            if let Some(declared) = provider.cookbook().trigger(&template.id) {
                let ingredients = declared.parse(&template.ingredients)?;
                return provider.trigger(&template.id, &ingredients, &self.bus);
            }
        }
        Err(UnmarshalRecipeError::unknown_template("trigger", &template.id))
    }

    fn build_action(
        &self,
        template: &TemplateRef,
    ) -> Result<Arc<dyn Action>, UnmarshalRecipeError> {
        for provider in &self.cookbooks {
            if let Some(declared) = provider.cookbook().action(&template.id) {
                let ingredients = declared.parse(&template.ingredients)?;
                return provider.action(&template.id, &ingredients);
            }
        }
        Err(UnmarshalRecipeError::unknown_template("action", &template.id))
    }

    /// Add `recipe` to the live set, start it if enabled, and persist it.
    ///
    /// # Errors
    ///
    /// Returns a `Shutdown` command error once the manager is closing, a
    /// duplicate validation error if the id is taken, or the observer's
    /// error.
    #[tracing::instrument(skip_all, fields(recipe = %recipe.definition().name))]
    pub async fn register_and_start(&self, recipe: Recipe) -> Result<RecipeId, HubError> {
        if self.shutdown.is_cancelled() {
            return Err(CommandError::shutdown().into());
        }
        let definition = recipe.definition().clone();
        {
            let mut recipes = self.lock();
            if recipes.contains_key(&definition.id) {
                return Err(ValidationError::Duplicate {
                    entity: "Recipe",
                    id: definition.id.to_string(),
                }
                .into());
            }
            let mut live = LiveRecipe {
                enabled: Arc::new(AtomicBool::new(definition.enabled)),
                recipe,
                stop: None,
            };
            if definition.enabled {
                self.start(&mut live);
            }
            recipes.insert(definition.id, live);
        }
        tracing::info!(recipe_id = %definition.id, enabled = definition.enabled, "recipe registered");
        self.observer
            .on_mutation(&Mutation::RecipeSaved(definition.clone()))
            .await?;
        Ok(definition.id)
    }

    /// Turn a recipe's trigger on or off. Idempotent.
    ///
    /// After disabling returns, no further firing of the recipe runs its
    /// action.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown id, or the observer's
    /// error.
    #[tracing::instrument(skip(self))]
    pub async fn enable_recipe(&self, id: RecipeId, enabled: bool) -> Result<(), HubError> {
        let definition = {
            let mut recipes = self.lock();
            let live = recipes.get_mut(&id).ok_or_else(|| not_found(id))?;
            if live.enabled.load(Ordering::SeqCst) == enabled {
                return Ok(());
            }
            live.enabled.store(enabled, Ordering::SeqCst);
            live.recipe.trigger().set_enabled(enabled);
            if enabled && live.stop.is_none() && !self.shutdown.is_cancelled() {
                self.start(live);
            }
            live.definition()
        };
        tracing::info!(enabled, "recipe toggled");
        self.observer
            .on_mutation(&Mutation::RecipeSaved(definition))
            .await
    }

    /// Stop and forget a recipe.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown id, or the observer's
    /// error.
    #[tracing::instrument(skip(self))]
    pub async fn delete_recipe(&self, id: RecipeId) -> Result<(), HubError> {
        let live = self.lock().remove(&id).ok_or_else(|| not_found(id))?;
        live.enabled.store(false, Ordering::SeqCst);
        live.recipe.trigger().set_enabled(false);
        if let Some(stop) = live.stop {
            stop.cancel();
        }
        tracing::info!("recipe deleted");
        self.observer
            .on_mutation(&Mutation::RecipeDeleted(id))
            .await
    }

    #[must_use]
    pub fn recipe_by_id(&self, id: RecipeId) -> Option<RecipeDefinition> {
        self.lock().get(&id).map(LiveRecipe::definition)
    }

    /// Every registered recipe, sorted by name.
    #[must_use]
    pub fn recipes(&self) -> Vec<RecipeDefinition> {
        let mut all: Vec<_> = self.lock().values().map(LiveRecipe::definition).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Ask a recipe's trigger to fire now.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown id and an `Unsupported`
    /// command error when the trigger cannot be fired on demand.
    pub fn fire(&self, id: RecipeId) -> Result<(), HubError> {
        let trigger = Arc::clone(self.lock().get(&id).ok_or_else(|| not_found(id))?.recipe.trigger());
        if trigger.fire() {
            Ok(())
        } else {
            Err(CommandError::unsupported("trigger cannot be fired on demand").into())
        }
    }

    /// Stop every trigger and wait for supervisors and running actions.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("recipe manager stopped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RecipeId, LiveRecipe>> {
        self.recipes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn start(&self, live: &mut LiveRecipe) {
        let stop = self.shutdown.child_token();
        let firings = live.recipe.trigger().start(stop.clone());
        let definition = live.recipe.definition();
        self.tasks.spawn(supervise(Supervisor {
            id: definition.id,
            name: definition.name.clone(),
            enabled: Arc::clone(&live.enabled),
            action: Arc::clone(live.recipe.action()),
            context: self.context.clone(),
            bus: self.bus.clone(),
            tasks: self.tasks.clone(),
            stop: stop.clone(),
        }, firings));
        live.stop = Some(stop);
    }
}

fn not_found(id: RecipeId) -> HubError {
    NotFoundError {
        entity: "Recipe",
        id: id.to_string(),
    }
    .into()
}

struct Supervisor {
    id: RecipeId,
    name: String,
    enabled: Arc<AtomicBool>,
    action: Arc<dyn Action>,
    context: ActionContext,
    bus: EventBus,
    tasks: TaskTracker,
    stop: CancellationToken,
}

async fn supervise(supervisor: Supervisor, firings: FireStream) {
    let Supervisor {
        id,
        name,
        enabled,
        action,
        context,
        bus,
        tasks,
        stop,
    } = supervisor;
    tracing::debug!(recipe_id = %id, "recipe supervisor started");
    let mut firings = std::pin::pin!(firings.take_until(stop.cancelled_owned()));
    while let Some(firing) = firings.next().await {
        if !enabled.load(Ordering::SeqCst) {
            continue;
        }
        tracing::debug!(recipe_id = %id, at = %firing.at, "trigger fired");
        bus.publish(Event::trigger_fired(id, name.clone()));

        let action = Arc::clone(&action);
        let context = context.clone();
        let name = name.clone();
        tasks.spawn(async move {
            if let Err(err) = action.execute(&context).await {
                tracing::warn!(recipe_id = %id, recipe = %name, error = %err, "recipe action failed");
            }
        });
    }
    tracing::debug!(recipe_id = %id, "recipe supervisor stopped");
}

//! # homehubd: homehub daemon
//!
//! Composition root that wires the core, the vendor adapters and the home
//! store together.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Open the JSON home store and restore the home it holds
//! - Register the enabled vendor extensions
//! - Seed a demo home on the simulated hub when the store is empty
//! - Log command outcomes and trigger firings
//! - Handle graceful shutdown (SIGTERM/SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

pub mod config;
pub mod demo;
pub mod store;

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;

use homehub_adapter_fluxwifi::FluxExtension;
use homehub_adapter_lutron::LutronExtension;
use homehub_adapter_virtual::{VirtualExtension, VirtualPlant};
use homehub_app::extensions::RegistrationError;
use homehub_app::ports::MutationObserver;
use homehub_app::system::System;
use homehub_domain::error::{HubError, ValidationError};
use homehub_domain::event::{EventPayload, Outcome};
use homehub_domain::recipe::UnmarshalRecipeError;

use crate::config::Config;
use crate::store::StoreError;

/// Failure while bringing the daemon up.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Home(#[from] HubError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("invalid recipe: {0}")]
    Recipe(#[from] UnmarshalRecipeError),

    #[error("extension registration failed")]
    Registration(#[from] RegistrationError),

    #[error("home store unavailable")]
    Store(#[from] StoreError),
}

/// Build a [`System`] with the extensions `config` enables.
///
/// The virtual extension is bound to `plant` so callers can watch the
/// simulated hubs.
///
/// # Errors
///
/// Returns [`RegistrationError`] if two extensions claim the same key.
pub fn build_system(
    config: &Config,
    observer: Arc<dyn MutationObserver>,
    plant: &VirtualPlant,
) -> Result<System, RegistrationError> {
    let mut builder = System::builder().config(config.system()).observer(observer);
    if config.integrations.virtual_enabled {
        builder = builder.extension(&VirtualExtension::new(plant.clone()))?;
    }
    if config.integrations.lutron_enabled {
        builder = builder.extension(&LutronExtension)?;
    }
    if config.integrations.fluxwifi_enabled {
        builder = builder.extension(&FluxExtension)?;
    }
    Ok(builder.build())
}

/// Log every event of `system` until the task is aborted.
pub fn spawn_event_logger(system: &System) -> JoinHandle<()> {
    let mut events = system.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event.payload {
                EventPayload::CommandOutcome(outcome) => match outcome.outcome {
                    Outcome::Ok => tracing::debug!(
                        kind = %outcome.command_kind,
                        address = outcome.target_address.as_deref().unwrap_or("-"),
                        "command done"
                    ),
                    Outcome::Failed(err) => tracing::warn!(
                        kind = %outcome.command_kind,
                        address = outcome.target_address.as_deref().unwrap_or("-"),
                        error = %err,
                        "command failed"
                    ),
                },
                EventPayload::TriggerFired { recipe_name, .. } => {
                    tracing::info!(recipe = %recipe_name, "trigger fired");
                }
                EventPayload::ConnectionStateChanged { device_id, state } => {
                    tracing::info!(hub = %device_id, ?state, "hub connection changed");
                }
            }
        }
    })
}

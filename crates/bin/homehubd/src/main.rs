use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use homehub_adapter_virtual::VirtualPlant;
use homehubd::config::Config;
use homehubd::store::HomeStore;
use homehubd::{build_system, demo, spawn_event_logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store = Arc::new(
        HomeStore::open(&config.storage.path)
            .await
            .with_context(|| format!("opening {}", config.storage.path.display()))?,
    );
    let document = store.document().await;

    let plant = VirtualPlant::new();
    let system = build_system(&config, store.clone(), &plant)?;
    let logger = spawn_event_logger(&system);

    if document.is_empty() {
        if config.integrations.virtual_enabled {
            demo::seed(&system, config.pool.default_capacity).await?;
        }
    } else {
        let restored = document.restore(&system).await?;
        tracing::info!(?restored, "home restored");
    }

    tracing::info!(
        store = %store.path().display(),
        recipes = system.recipes().recipes().len(),
        "homehubd running"
    );

    shutdown_signal().await;
    tracing::info!("shutting down");
    system.shutdown().await;
    logger.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

//! End-to-end tests for the full homehubd stack.
//!
//! Each test builds the complete system (real processor, pools, recipe
//! engine and home store) on top of the simulated hubs of the virtual
//! adapter, and watches what reaches their journals.

use std::sync::Arc;
use std::time::Duration;

use homehub_adapter_virtual::VirtualPlant;
use homehub_app::ports::NoopObserver;
use homehub_app::system::System;
use homehub_domain::command::Command;
use homehub_domain::error::ErrorKind;
use homehub_domain::level::Level;
use homehubd::config::Config;
use homehubd::demo::{self, DEMO_HUB_ADDRESS, DemoHome};
use homehubd::store::HomeStore;
use homehubd::build_system;

async fn demo_home() -> (System, VirtualPlant, DemoHome) {
    let plant = VirtualPlant::new();
    let system = build_system(&Config::default(), Arc::new(NoopObserver), &plant).unwrap();
    let home = demo::seed(&system, 2).await.unwrap();
    (system, plant, home)
}

/// Poll the demo hub's journal until it holds `len` lines.
async fn journal_with(plant: &VirtualPlant, len: usize) -> Vec<String> {
    for _ in 0..100 {
        let journal = plant.journal(DEMO_HUB_ADDRESS);
        if journal.len() >= len {
            return journal;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    plant.journal(DEMO_HUB_ADDRESS)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_write_zone_level_to_the_hub() {
    let (system, plant, home) = demo_home().await;

    let outcome = system
        .processor()
        .submit(Command::set_level(&home.kitchen, Level::new(42.5).unwrap()))
        .await;

    assert!(outcome.is_ok(), "{outcome:?}");
    assert_eq!(plant.journal(DEMO_HUB_ADDRESS), ["SET 1 42.5"]);
    assert_eq!(plant.level(DEMO_HUB_ADDRESS, "1"), Some(42.5));
    system.shutdown().await;
}

#[tokio::test]
async fn should_run_scene_commands_in_declared_order() {
    let (system, plant, home) = demo_home().await;

    let outcome = system.processor().submit(Command::activate(&home.evening)).await;

    assert!(outcome.is_ok(), "{outcome:?}");
    assert_eq!(
        plant.journal(DEMO_HUB_ADDRESS),
        ["SET 1 40", "SET 2 70", "SET 3 0"]
    );
    system.shutdown().await;
}

#[tokio::test]
async fn should_recover_once_hub_comes_back_online() {
    let (system, plant, home) = demo_home().await;

    plant.set_offline(DEMO_HUB_ADDRESS, true);
    let outcome = system.processor().submit(Command::turn_on(&home.porch)).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::TransportUnavailable));

    plant.set_offline(DEMO_HUB_ADDRESS, false);
    let outcome = system.processor().submit(Command::turn_on(&home.porch)).await;
    assert!(outcome.is_ok(), "{outcome:?}");
    assert_eq!(plant.journal(DEMO_HUB_ADDRESS), ["SET 3 100"]);
    system.shutdown().await;
}

#[tokio::test]
async fn should_refuse_commands_after_shutdown() {
    let (system, _plant, home) = demo_home().await;
    let outcome = system.processor().submit(Command::turn_on(&home.kitchen)).await;
    assert!(outcome.is_ok(), "{outcome:?}");
    system.shutdown().await;

    let err = system
        .processor()
        .enqueue(Command::turn_on(&home.kitchen))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Shutdown);
    let pool = system.pools().get(home.hub.id).unwrap();
    assert_eq!(pool.stats().in_use, 0);
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_run_evening_scene_on_double_click() {
    let (system, plant, home) = demo_home().await;

    for _ in 0..2 {
        let outcome = system
            .processor()
            .submit(Command::press(&home.keypad, &home.all_on))
            .await;
        assert!(outcome.is_ok(), "{outcome:?}");
    }

    let journal = journal_with(&plant, 5).await;
    assert_eq!(
        journal,
        ["PRESS 10 1", "PRESS 10 1", "SET 1 40", "SET 2 70", "SET 3 0"]
    );
    system.shutdown().await;
}

#[tokio::test]
async fn should_seed_disabled_timer_recipe() {
    let (system, _plant, _home) = demo_home().await;

    let recipes = system.recipes().recipes();
    assert_eq!(recipes.len(), 2);
    let timer = recipes
        .iter()
        .find(|recipe| recipe.trigger.id == "time")
        .unwrap();
    assert!(!timer.enabled);
    system.shutdown().await;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_restore_home_and_recipes_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("home.json");
    let config = Config::default();

    let home = {
        let store = Arc::new(HomeStore::open(&path).await.unwrap());
        let system = build_system(&config, store, &VirtualPlant::new()).unwrap();
        let home = demo::seed(&system, 2).await.unwrap();
        system.shutdown().await;
        home
    };

    let store = Arc::new(HomeStore::open(&path).await.unwrap());
    let document = store.document().await;
    assert_eq!(document.zones.len(), 3);
    assert_eq!(document.recipes.len(), 2);

    let plant = VirtualPlant::new();
    let system = build_system(&config, store, &plant).unwrap();
    let restored = document.restore(&system).await.unwrap();
    assert_eq!(restored.devices, 2);
    assert_eq!(restored.zones, 3);
    assert_eq!(restored.buttons, 1);
    assert_eq!(restored.scenes, 1);
    assert_eq!(restored.recipes, 2);
    assert_eq!(restored.skipped_recipes, 0);

    let outcome = system.processor().submit(Command::activate(&home.evening)).await;
    assert!(outcome.is_ok(), "{outcome:?}");
    assert_eq!(
        plant.journal(DEMO_HUB_ADDRESS),
        ["SET 1 40", "SET 2 70", "SET 3 0"]
    );
    system.shutdown().await;
}

#[tokio::test]
async fn should_persist_recipe_toggle_and_deletion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("home.json");
    let store = Arc::new(HomeStore::open(&path).await.unwrap());
    let system = build_system(&Config::default(), store.clone(), &VirtualPlant::new()).unwrap();
    demo::seed(&system, 2).await.unwrap();

    let recipes = system.recipes().recipes();
    let timer = recipes.iter().find(|r| r.trigger.id == "time").unwrap();
    let click = recipes.iter().find(|r| r.trigger.id == "button_click").unwrap();
    system.recipes().enable_recipe(timer.id, true).await.unwrap();
    system.recipes().delete_recipe(click.id).await.unwrap();
    system.shutdown().await;

    let document = HomeStore::open(&path).await.unwrap().document().await;
    assert_eq!(document.recipes.len(), 1);
    assert!(document.recipes[&timer.id].enabled);
}

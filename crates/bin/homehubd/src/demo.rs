//! Demo home on a simulated hub, seeded into an empty store.

use serde_json::json;

use homehub_adapter_virtual::{MODEL_ID, NETWORK_KIND};
use homehub_app::system::System;
use homehub_domain::button::Button;
use homehub_domain::command::Command;
use homehub_domain::device::{ConnectionInfo, Device};
use homehub_domain::level::Level;
use homehub_domain::scene::Scene;
use homehub_domain::zone::{Output, Zone, ZoneType};

use crate::SetupError;

/// Address of the demo hub on the virtual network.
pub const DEMO_HUB_ADDRESS: &str = "demo-hub";

/// Ids of what [`seed`] created.
#[derive(Debug, Clone)]
pub struct DemoHome {
    pub hub: Device,
    pub keypad: Device,
    pub kitchen: Zone,
    pub living_room: Zone,
    pub porch: Zone,
    pub all_on: Button,
    pub evening: Scene,
}

/// Register a hub with three zones, a keypad and an evening scene, plus
/// two recipes: a double click on the keypad's first button runs the
/// scene, and a disabled timer turns the porch on every minute.
///
/// # Errors
///
/// Returns the first registry, observer or recipe error.
pub async fn seed(system: &System, pool_size: usize) -> Result<DemoHome, SetupError> {
    let hub = Device::builder()
        .name("Demo hub")
        .local_id("1")
        .model_number(MODEL_ID)
        .connection(ConnectionInfo::new(NETWORK_KIND, DEMO_HUB_ADDRESS).with_pool_size(pool_size))
        .build()?;
    system.add_device(hub.clone()).await?;

    let keypad = Device::builder()
        .name("Hall keypad")
        .local_id("10")
        .model_number(MODEL_ID)
        .hub(hub.id)
        .build()?;
    system.add_device(keypad.clone()).await?;

    let light = |name: &str, address: &str| {
        Zone::builder()
            .name(name)
            .address(address)
            .device_id(hub.id)
            .zone_type(ZoneType::Light)
            .build()
    };
    let kitchen = light("Kitchen", "1")?;
    let living_room = light("Living room", "2")?;
    let porch = Zone::builder()
        .name("Porch")
        .address("3")
        .device_id(hub.id)
        .zone_type(ZoneType::Switch)
        .output(Output::Binary)
        .build()?;
    for zone in [&kitchen, &living_room, &porch] {
        system.add_zone(zone.clone()).await?;
    }

    let all_on = Button::new(keypad.id, "1", "All on")?;
    system.add_button(all_on.clone()).await?;

    let evening = Scene::builder()
        .name("Evening")
        .description("Dimmed kitchen, living room up, porch off")
        .command(Command::set_level(&kitchen, Level::new(40.0)?))
        .command(Command::set_level(&living_room, Level::new(70.0)?))
        .command(Command::turn_off(&porch))
        .build()?;
    system.add_scene(evening.clone()).await?;

    let recipes = [
        json!({
            "name": "Evening on double click",
            "description": "Double click on the hall keypad runs the evening scene",
            "enabled": true,
            "trigger": {
                "id": "button_click",
                "ingredients": {
                    "deviceId": keypad.id.to_string(),
                    "buttonAddress": all_on.address,
                    "clickCount": 2,
                },
            },
            "action": {"id": "scene_set", "ingredients": {"sceneId": evening.id.to_string()}},
        }),
        json!({
            "name": "Porch every minute",
            "description": "",
            "enabled": false,
            "trigger": {"id": "time", "ingredients": {"interval": 60}},
            "action": {"id": "zone_turn_on", "ingredients": {"zoneId": porch.id.to_string()}},
        }),
    ];
    for data in &recipes {
        let recipe = system.recipes().unmarshal_new_recipe(data)?;
        system.recipes().register_and_start(recipe).await?;
    }

    tracing::info!(hub = %hub.id, "demo home seeded");
    Ok(DemoHome {
        hub,
        keypad,
        kitchen,
        living_room,
        porch,
        all_on,
        evening,
    })
}

//! The core cookbook: timer, button-click and manual triggers, and the zone
//! and scene actions.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use homehub_domain::command::{Command, CommandKind};
use homehub_domain::cookbook::{CookBook, Ingredient, IngredientType, Ingredients, Template};
use homehub_domain::error::{HubError, NotFoundError};
use homehub_domain::id::{DeviceId, SceneId, ZoneId};
use homehub_domain::level::Level;
use homehub_domain::recipe::UnmarshalRecipeError;

use super::{Action, ActionContext, CookBookProvider, FireStream, Firing, Trigger};
use crate::event_bus::EventBus;

pub const COOKBOOK_ID: &str = "core";

pub const TIME_TRIGGER: &str = "time";
pub const BUTTON_CLICK_TRIGGER: &str = "button_click";
pub const MANUAL_TRIGGER: &str = "manual";

pub const ZONE_SET_LEVEL_ACTION: &str = "zone_set_level";
pub const ZONE_TURN_ON_ACTION: &str = "zone_turn_on";
pub const ZONE_TURN_OFF_ACTION: &str = "zone_turn_off";
pub const SCENE_SET_ACTION: &str = "scene_set";

const DEFAULT_CLICK_COUNT: i64 = 1;
const DEFAULT_MAX_CLICK_DELAY_MS: i64 = 500;

/// Provider of the core cookbook.
#[derive(Debug, Clone)]
pub struct CoreCookBook {
    book: CookBook,
}

impl Default for CoreCookBook {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreCookBook {
    #[must_use]
    pub fn new() -> Self {
        let zone_id = || Ingredient::required("zoneId", "Zone", "Id of the zone", IngredientType::String);
        Self {
            book: CookBook {
                id: COOKBOOK_ID.to_string(),
                name: "Core".to_string(),
                description: "Timers, buttons and zone control".to_string(),
                triggers: vec![
                    Template::new(TIME_TRIGGER, "Time", "Fires on a fixed interval")
                        .ingredient(Ingredient::required(
                            "interval",
                            "Interval",
                            "Seconds between firings",
                            IngredientType::Duration,
                        ))
                        .ingredient(Ingredient::optional(
                            "iterations",
                            "Iterations",
                            "Number of firings, 0 for no limit",
                            IngredientType::Integer,
                        )),
                    Template::new(
                        BUTTON_CLICK_TRIGGER,
                        "Button Click",
                        "Fires when a button is pressed a number of times in a row",
                    )
                    .ingredient(Ingredient::required(
                        "deviceId",
                        "Device",
                        "Id of the device that owns the button",
                        IngredientType::String,
                    ))
                    .ingredient(Ingredient::required(
                        "buttonAddress",
                        "Button",
                        "Address of the button on the device",
                        IngredientType::String,
                    ))
                    .ingredient(Ingredient::optional(
                        "clickCount",
                        "Click Count",
                        "Presses needed to fire",
                        IngredientType::Integer,
                    ))
                    .ingredient(Ingredient::optional(
                        "maxClickDelayMs",
                        "Max Click Delay",
                        "Longest gap between presses, in milliseconds",
                        IngredientType::Integer,
                    )),
                    Template::new(MANUAL_TRIGGER, "Manual", "Fires when asked to"),
                ],
                actions: vec![
                    Template::new(ZONE_SET_LEVEL_ACTION, "Set Zone Level", "Sets a zone to a level")
                        .ingredient(zone_id())
                        .ingredient(Ingredient::required(
                            "level",
                            "Level",
                            "Level between 0 and 100",
                            IngredientType::Float,
                        )),
                    Template::new(ZONE_TURN_ON_ACTION, "Turn Zone On", "Sets a zone to full")
                        .ingredient(zone_id()),
                    Template::new(ZONE_TURN_OFF_ACTION, "Turn Zone Off", "Turns a zone off")
                        .ingredient(zone_id()),
                    Template::new(SCENE_SET_ACTION, "Set Scene", "Activates a scene").ingredient(
                        Ingredient::required("sceneId", "Scene", "Id of the scene", IngredientType::String),
                    ),
                ],
            },
        }
    }
}

impl CookBookProvider for CoreCookBook {
    fn cookbook(&self) -> &CookBook {
        &self.book
    }

    fn trigger(
        &self,
        template_id: &str,
        ingredients: &Ingredients,
        bus: &EventBus,
    ) -> Result<Arc<dyn Trigger>, UnmarshalRecipeError> {
        match template_id {
            TIME_TRIGGER => {
                let interval = ingredients
                    .duration("interval")
                    .ok_or_else(|| UnmarshalRecipeError::required("interval"))?;
                if interval.is_zero() {
                    return Err(UnmarshalRecipeError::invalid_value(
                        "interval",
                        "interval must be greater than zero",
                    ));
                }
                let iterations = non_negative(ingredients, "iterations", 0)?;
                Ok(Arc::new(TimeTrigger::new(interval, iterations)))
            }
            BUTTON_CLICK_TRIGGER => {
                let device_id = parse_id::<DeviceId>(ingredients, "deviceId")?;
                let button_address = ingredients
                    .string("buttonAddress")
                    .ok_or_else(|| UnmarshalRecipeError::required("buttonAddress"))?
                    .to_string();
                let click_count = non_negative(ingredients, "clickCount", DEFAULT_CLICK_COUNT)?.max(1);
                let max_delay = non_negative(ingredients, "maxClickDelayMs", DEFAULT_MAX_CLICK_DELAY_MS)?;
                Ok(Arc::new(ButtonClickTrigger {
                    bus: bus.clone(),
                    device_id,
                    button_address,
                    click_count,
                    max_click_delay: Duration::from_millis(max_delay),
                    enabled: Arc::new(AtomicBool::new(false)),
                }))
            }
            MANUAL_TRIGGER => Ok(Arc::new(ManualTrigger::new())),
            other => Err(UnmarshalRecipeError::unknown_template("trigger", other)),
        }
    }

    fn action(
        &self,
        template_id: &str,
        ingredients: &Ingredients,
    ) -> Result<Arc<dyn Action>, UnmarshalRecipeError> {
        match template_id {
            ZONE_SET_LEVEL_ACTION => {
                let zone_id = parse_id::<ZoneId>(ingredients, "zoneId")?;
                let level = ingredients
                    .float("level")
                    .ok_or_else(|| UnmarshalRecipeError::required("level"))?;
                #[allow(clippy::cast_possible_truncation)]
                let level = Level::new(level as f32)
                    .map_err(|err| UnmarshalRecipeError::invalid_value("level", err.to_string()))?;
                Ok(Arc::new(ZoneAction {
                    zone_id,
                    level: Some(level),
                    kind: CommandKind::ZoneSetLevel,
                }))
            }
            ZONE_TURN_ON_ACTION => Ok(Arc::new(ZoneAction {
                zone_id: parse_id(ingredients, "zoneId")?,
                level: None,
                kind: CommandKind::ZoneTurnOn,
            })),
            ZONE_TURN_OFF_ACTION => Ok(Arc::new(ZoneAction {
                zone_id: parse_id(ingredients, "zoneId")?,
                level: None,
                kind: CommandKind::ZoneTurnOff,
            })),
            SCENE_SET_ACTION => Ok(Arc::new(SceneAction {
                scene_id: parse_id(ingredients, "sceneId")?,
            })),
            other => Err(UnmarshalRecipeError::unknown_template("action", other)),
        }
    }
}

fn parse_id<T: FromStr>(ingredients: &Ingredients, id: &str) -> Result<T, UnmarshalRecipeError> {
    let raw = ingredients
        .string(id)
        .ok_or_else(|| UnmarshalRecipeError::required(id))?;
    raw.parse()
        .map_err(|_| UnmarshalRecipeError::invalid_value(id, format!("{raw:?} is not a valid id")))
}

fn non_negative(ingredients: &Ingredients, id: &str, default: i64) -> Result<u64, UnmarshalRecipeError> {
    let value = ingredients.integer(id).unwrap_or(default);
    u64::try_from(value)
        .map_err(|_| UnmarshalRecipeError::invalid_value(id, format!("{id} must not be negative")))
}

/// Fires every `interval`, `iterations` times (0 for no limit).
pub struct TimeTrigger {
    interval: Duration,
    iterations: u64,
    enabled: Arc<AtomicBool>,
}

impl TimeTrigger {
    #[must_use]
    pub fn new(interval: Duration, iterations: u64) -> Self {
        Self {
            interval,
            iterations,
            enabled: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Trigger for TimeTrigger {
    fn start(&self, stop: CancellationToken) -> FireStream {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let state = (ticker, 0u64);
        let enabled = Arc::clone(&self.enabled);
        let limit = self.iterations;
        stream::unfold(state, move |(mut ticker, mut fired)| {
            let stop = stop.clone();
            let enabled = Arc::clone(&enabled);
            async move {
                loop {
                    if limit != 0 && fired >= limit {
                        return None;
                    }
                    tokio::select! {
                        biased;
                        () = stop.cancelled() => return None,
                        _ = ticker.tick() => {}
                    }
                    if enabled.load(Ordering::SeqCst) {
                        fired += 1;
                        return Some((Firing::now(), (ticker, fired)));
                    }
                }
            }
        })
        .boxed()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Fires after `click_count` successful presses of one button, each within
/// `max_click_delay` of the previous one.
pub struct ButtonClickTrigger {
    bus: EventBus,
    device_id: DeviceId,
    button_address: String,
    click_count: u64,
    max_click_delay: Duration,
    enabled: Arc<AtomicBool>,
}

impl Trigger for ButtonClickTrigger {
    fn start(&self, stop: CancellationToken) -> FireStream {
        let device_id = self.device_id;
        let address = self.button_address.clone();
        let enabled = Arc::clone(&self.enabled);
        let needed = self.click_count;
        let max_delay = self.max_click_delay;
        let mut count = 0u64;
        let mut last: Option<Instant> = None;

        // The supervisor polls without awaiting anything else, so presses
        // are timed as they arrive.
        self.bus
            .subscribe_outcomes()
            .take_until(stop.cancelled_owned())
            .filter_map(move |event| {
                let pressed = event.command_kind == CommandKind::ButtonPress
                    && event.outcome.is_ok()
                    && event.target_device_id == Some(device_id)
                    && event.target_address.as_deref() == Some(address.as_str());
                let mut firing = None;
                if pressed {
                    let now = Instant::now();
                    count = match last {
                        Some(previous) if now.duration_since(previous) <= max_delay => count + 1,
                        _ => 1,
                    };
                    last = Some(now);
                    if count >= needed {
                        count = 0;
                        last = None;
                        if enabled.load(Ordering::SeqCst) {
                            firing = Some(Firing::now());
                        }
                    }
                }
                futures::future::ready(firing)
            })
            .boxed()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Fires whenever [`Trigger::fire`] is called.
pub struct ManualTrigger {
    fired: broadcast::Sender<()>,
    enabled: AtomicBool,
}

impl Default for ManualTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualTrigger {
    #[must_use]
    pub fn new() -> Self {
        let (fired, _) = broadcast::channel(16);
        Self {
            fired,
            enabled: AtomicBool::new(false),
        }
    }
}

impl Trigger for ManualTrigger {
    fn start(&self, stop: CancellationToken) -> FireStream {
        tokio_stream::wrappers::BroadcastStream::new(self.fired.subscribe())
            .take_until(stop.cancelled_owned())
            .filter_map(|fired| futures::future::ready(fired.ok().map(|()| Firing::now())))
            .boxed()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn fire(&self) -> bool {
        if self.enabled() {
            let _ = self.fired.send(());
        }
        true
    }
}

struct ZoneAction {
    zone_id: ZoneId,
    level: Option<Level>,
    kind: CommandKind,
}

#[async_trait]
impl Action for ZoneAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<(), HubError> {
        let catalog = ctx.registry.snapshot();
        let zone = catalog.zone(self.zone_id).ok_or_else(|| NotFoundError {
            entity: "Zone",
            id: self.zone_id.to_string(),
        })?;
        let command = match (self.kind, self.level) {
            (CommandKind::ZoneTurnOff, _) => Command::turn_off(zone),
            (CommandKind::ZoneSetLevel, Some(level)) => Command::set_level(zone, level),
            _ => Command::turn_on(zone),
        };
        ctx.processor.submit(command).await.into_result()?;
        Ok(())
    }
}

struct SceneAction {
    scene_id: SceneId,
}

#[async_trait]
impl Action for SceneAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<(), HubError> {
        let catalog = ctx.registry.snapshot();
        let scene = catalog.scene(self.scene_id).ok_or_else(|| NotFoundError {
            entity: "Scene",
            id: self.scene_id.to_string(),
        })?;
        ctx.processor.submit(Command::activate(scene)).await.into_result()?;
        Ok(())
    }
}

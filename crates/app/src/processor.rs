//! Command processor: turns logical commands into wire writes.
//!
//! ```text
//! enqueue ──► intake (bounded) ──► dispatcher ──┬─► lane(hub A) ──► pool A ──► emitter
//!                                               └─► lane(hub B) ──► pool B ──► emitter
//! ```
//!
//! The dispatcher expands scenes and routes every leaf command to the lane
//! of its target hub. A lane acquires connections in arrival order and
//! starts each write only after the previous one finished, so writes to one
//! hub are strictly ordered while hubs proceed in parallel.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use homehub_domain::command::Command;
use homehub_domain::error::{CommandError, ErrorKind};
use homehub_domain::event::{Event, Outcome, OutcomeEvent};
use homehub_domain::id::{DeviceId, SceneId, TicketId};
use homehub_domain::scene::{MAX_SCENE_DEPTH, Scene};

use crate::event_bus::{EventBus, EventStream};
use crate::extensions::ExtensionRegistry;
use crate::pool::{ConnectionPool, PoolSet, PooledConnection};
use crate::ports::Emitter;
use crate::registry::{self, Catalog, DeviceRegistry};

/// Intake and timing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Commands buffered before `enqueue` answers `Overloaded`. Also the
    /// buffer of each hub lane.
    pub intake_capacity: usize,
    pub acquire_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 256,
            acquire_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle on one enqueued command.
///
/// Awaiting consumes it; dropping it is allowed and does not cancel the
/// command.
#[derive(Debug)]
pub struct Ticket {
    id: TicketId,
    outcome: oneshot::Receiver<Outcome>,
}

impl Ticket {
    #[must_use]
    pub fn id(&self) -> TicketId {
        self.id
    }

    /// Wait until the command has been attempted.
    pub async fn wait(self) -> Outcome {
        self.outcome
            .await
            .unwrap_or_else(|_| Outcome::Failed(CommandError::shutdown()))
    }
}

struct Job {
    ticket: TicketId,
    command: Command,
    reply: oneshot::Sender<Outcome>,
}

struct Shared {
    registry: Arc<DeviceRegistry>,
    extensions: Arc<ExtensionRegistry>,
    pools: Arc<PoolSet>,
    bus: EventBus,
    config: ProcessorConfig,
    next_ticket: AtomicU64,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Shared {
    fn next_ticket(&self) -> TicketId {
        TicketId(self.next_ticket.fetch_add(1, Ordering::Relaxed))
    }

    fn finish(&self, job: Job, outcome: Outcome) {
        match &outcome {
            Outcome::Ok => {
                tracing::debug!(ticket = %job.ticket, command = %job.command, "command succeeded");
            }
            Outcome::Failed(err) if err.kind == ErrorKind::Internal => {
                tracing::error!(ticket = %job.ticket, command = %job.command, error = %err, "command failed");
            }
            Outcome::Failed(err) => {
                tracing::debug!(ticket = %job.ticket, command = %job.command, error = %err, "command failed");
            }
        }
        self.bus
            .publish(Event::outcome(OutcomeEvent::new(job.ticket, &job.command, outcome.clone())));
        let _ = job.reply.send(outcome);
    }
}

/// Ordered, per-hub dispatch of commands.
pub struct CommandProcessor {
    intake: mpsc::Sender<Job>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CommandProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProcessor")
            .field("config", &self.shared.config)
            .field("closing", &self.shared.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CommandProcessor {
    /// Start the dispatcher. Must be called within a tokio runtime.
    #[must_use]
    pub fn start(
        registry: Arc<DeviceRegistry>,
        extensions: Arc<ExtensionRegistry>,
        pools: Arc<PoolSet>,
        bus: EventBus,
        config: ProcessorConfig,
    ) -> Self {
        let capacity = config.intake_capacity.max(1);
        let (intake, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            registry,
            extensions,
            pools,
            bus,
            config,
            next_ticket: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });
        shared.tasks.spawn(dispatch(Arc::clone(&shared), rx));
        tracing::info!(intake_capacity = capacity, "command processor started");
        Self { intake, shared }
    }

    /// Validate `command` and queue it.
    ///
    /// # Errors
    ///
    /// - `UnknownEntity` if the target device, zone or scene is unknown
    /// - `Unsupported` if the target device's model has no builder
    /// - `Overloaded` if the intake is full
    /// - `Shutdown` if the processor is closing
    pub fn enqueue(&self, command: Command) -> Result<Ticket, CommandError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(CommandError::shutdown());
        }
        let catalog = self.shared.registry.snapshot();
        check_target(&self.shared.extensions, &command, &catalog)?;

        let id = self.shared.next_ticket();
        let (reply, outcome) = oneshot::channel();
        let job = Job {
            ticket: id,
            command,
            reply,
        };
        self.intake.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!("command intake full");
                CommandError::new(ErrorKind::Overloaded, "command intake is full")
            }
            mpsc::error::TrySendError::Closed(_) => CommandError::shutdown(),
        })?;
        tracing::debug!(ticket = %id, "command enqueued");
        Ok(Ticket { id, outcome })
    }

    /// Enqueue and wait for the outcome.
    pub async fn submit(&self, command: Command) -> Outcome {
        match self.enqueue(command) {
            Ok(ticket) => ticket.wait().await,
            Err(err) => Outcome::Failed(err),
        }
    }

    /// Every command outcome published after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventStream<OutcomeEvent> {
        self.shared.bus.subscribe_outcomes()
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop accepting commands, resolve queued ones with `Shutdown`, and
    /// wait for in-flight writes to finish. Pools are left to the caller.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
        tracing::info!("command processor stopped");
    }
}

fn no_builder(model: &str) -> CommandError {
    CommandError::unsupported(format!("no command builder for model {model}"))
}

type Lanes = HashMap<DeviceId, mpsc::Sender<Job>>;

async fn dispatch(shared: Arc<Shared>, mut intake: mpsc::Receiver<Job>) {
    let mut lanes = Lanes::new();
    loop {
        let job = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            job = intake.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        if let Command::SceneSet { scene_id, .. } = &job.command {
            let scene_id = *scene_id;
            expand_scene(&shared, &mut lanes, job, scene_id);
        } else {
            route(&shared, &mut lanes, job);
        }
    }

    intake.close();
    while let Ok(job) = intake.try_recv() {
        shared.finish(job, Outcome::Failed(CommandError::shutdown()));
    }
    tracing::debug!("dispatcher stopped");
}

/// Send a leaf command to the lane of its hub.
fn route(shared: &Arc<Shared>, lanes: &mut Lanes, job: Job) {
    let catalog = shared.registry.snapshot();
    let hub_id = match hub_for(&job.command, &catalog) {
        Ok(hub_id) => hub_id,
        Err(err) => return shared.finish(job, Outcome::Failed(err)),
    };
    let lane = lanes.entry(hub_id).or_insert_with(|| {
        let (tx, rx) = mpsc::channel(shared.config.intake_capacity.max(1));
        shared.tasks.spawn(run_lane(Arc::clone(shared), hub_id, rx));
        tx
    });
    if let Err(err) = lane.try_send(job) {
        match err {
            mpsc::error::TrySendError::Full(job) => shared.finish(
                job,
                Outcome::failed(ErrorKind::Overloaded, "hub lane is full"),
            ),
            mpsc::error::TrySendError::Closed(job) => {
                shared.finish(job, Outcome::Failed(CommandError::shutdown()));
            }
        }
    }
}

fn hub_for(command: &Command, catalog: &Catalog) -> Result<DeviceId, CommandError> {
    let device = command
        .target_device()
        .and_then(|id| catalog.device(id))
        .ok_or_else(|| CommandError::unknown_entity(format!("no device for {command}")))?;
    catalog
        .hub_of(device)
        .map(|hub| hub.id)
        .ok_or_else(|| CommandError::unknown_entity(format!("hub of device {} not found", device.id)))
}

/// Flatten a scene into leaf commands, preserving declared order. A nested
/// scene that is missing or too deep stays in place with its failure.
fn flatten(
    scene: &Scene,
    catalog: &Catalog,
    depth: usize,
    out: &mut Vec<(Command, Option<CommandError>)>,
) {
    for command in &scene.commands {
        let Command::SceneSet { scene_id: nested, .. } = command else {
            out.push((command.clone(), None));
            continue;
        };
        if depth + 1 >= MAX_SCENE_DEPTH {
            let err = CommandError::unsupported(format!(
                "scene {nested} nested deeper than {MAX_SCENE_DEPTH} levels"
            ));
            out.push((command.clone(), Some(err)));
        } else if let Some(inner) = catalog.scene(*nested) {
            flatten(inner, catalog, depth + 1, out);
        } else {
            let err = CommandError::unknown_entity(format!("scene {nested} not found"));
            out.push((command.clone(), Some(err)));
        }
    }
}

/// Route every constituent of a scene and resolve the scene's own ticket
/// once all of them have completed. Every constituent publishes its own
/// outcome, including the ones that fail before reaching a lane.
fn expand_scene(shared: &Arc<Shared>, lanes: &mut Lanes, job: Job, scene_id: SceneId) {
    let catalog = shared.registry.snapshot();
    let Some(scene) = catalog.scene(scene_id) else {
        let err = CommandError::unknown_entity(format!("scene {scene_id} not found"));
        return shared.finish(job, Outcome::Failed(err));
    };
    let mut leaves = Vec::new();
    flatten(scene, &catalog, 0, &mut leaves);
    tracing::debug!(ticket = %job.ticket, constituents = leaves.len(), "expanding scene");

    let mut pending = Vec::with_capacity(leaves.len());
    for (command, failure) in leaves {
        let (reply, outcome) = oneshot::channel();
        let ticket = Ticket {
            id: shared.next_ticket(),
            outcome,
        };
        let failure =
            failure.or_else(|| check_target(&shared.extensions, &command, &catalog).err());
        let constituent = Job {
            ticket: ticket.id,
            command,
            reply,
        };
        match failure {
            Some(err) => shared.finish(constituent, Outcome::Failed(err)),
            None => route(shared, lanes, constituent),
        }
        pending.push(ticket);
    }

    let aggregator = Arc::clone(shared);
    shared.tasks.spawn(async move {
        let mut first_failure = None;
        for ticket in pending {
            if let Outcome::Failed(err) = ticket.wait().await {
                first_failure.get_or_insert(err);
            }
        }
        let outcome = match first_failure {
            None => Outcome::Ok,
            Some(err) => Outcome::failed(
                err.kind,
                format!("scene constituent failed: {}", err.message),
            ),
        };
        aggregator.finish(job, outcome);
    });
}

/// Enqueue-time checks: every named entity exists and the target model has
/// a builder.
fn check_target(
    extensions: &ExtensionRegistry,
    command: &Command,
    catalog: &Catalog,
) -> Result<(), CommandError> {
    registry::resolve(command, catalog)
        .map_err(|err| CommandError::unknown_entity(err.to_string()))?;
    if let Some(device) = command.target_device().and_then(|id| catalog.device(id))
        && extensions.builder(&device.model_number).is_none()
    {
        return Err(no_builder(&device.model_number));
    }
    Ok(())
}

#[tracing::instrument(skip(shared, rx))]
async fn run_lane(shared: Arc<Shared>, hub_id: DeviceId, mut rx: mpsc::Receiver<Job>) {
    tracing::debug!("lane started");
    let mut in_flight: Option<JoinHandle<()>> = None;
    loop {
        let job = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        process(&shared, hub_id, job, &mut in_flight).await;
    }

    rx.close();
    while let Ok(job) = rx.try_recv() {
        shared.finish(job, Outcome::Failed(CommandError::shutdown()));
    }
    if let Some(handle) = in_flight {
        let _ = handle.await;
    }
    tracing::debug!("lane stopped");
}

/// Resolve, build, acquire; then hand the write to a task once the previous
/// write on this lane has finished.
///
/// An acquire failure is reported as soon as the acquire timeout expires,
/// even while the previous write is still running.
async fn process(
    shared: &Arc<Shared>,
    hub_id: DeviceId,
    job: Job,
    in_flight: &mut Option<JoinHandle<()>>,
) {
    let catalog = shared.registry.snapshot();
    let prepared = prepare(shared, &job.command, &catalog);
    let (emitter, pool) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            settle(in_flight).await;
            return shared.finish(job, Outcome::Failed(err));
        }
    };
    debug_assert_eq!(pool.hub_id(), hub_id);

    let acquired = tokio::select! {
        biased;
        () = shared.shutdown.cancelled() => Err(CommandError::shutdown()),
        result = pool.get(shared.config.acquire_timeout) => result.map_err(CommandError::from),
    };
    let conn = match acquired {
        Ok(conn) => conn,
        Err(err) => return shared.finish(job, Outcome::Failed(err)),
    };

    settle(in_flight).await;
    if shared.shutdown.is_cancelled() {
        drop(conn);
        return shared.finish(job, Outcome::Failed(CommandError::shutdown()));
    }
    let write = emit(Arc::clone(shared), job, emitter, conn);
    *in_flight = Some(shared.tasks.spawn(write));
}

/// Wait for the previous write of a lane, if any.
async fn settle(in_flight: &mut Option<JoinHandle<()>>) {
    if let Some(previous) = in_flight.take() {
        let _ = previous.await;
    }
}

fn prepare(
    shared: &Shared,
    command: &Command,
    catalog: &Catalog,
) -> Result<(Box<dyn Emitter>, Arc<ConnectionPool>), CommandError> {
    let device = command
        .target_device()
        .and_then(|id| catalog.device(id))
        .ok_or_else(|| CommandError::unknown_entity(format!("target of {command} no longer exists")))?;
    let hub = catalog.hub_of(device).ok_or_else(|| {
        CommandError::unknown_entity(format!("hub of device {} no longer exists", device.id))
    })?;
    let builder = shared
        .extensions
        .builder(&device.model_number)
        .ok_or_else(|| no_builder(&device.model_number))?;
    let emitter = builder.build(command, catalog)?;
    let pool = shared.pools.pool_for(hub)?;
    Ok((emitter, pool))
}

async fn emit(shared: Arc<Shared>, job: Job, emitter: Box<dyn Emitter>, mut conn: PooledConnection) {
    let write_timeout = shared.config.write_timeout;
    let write = tokio::time::timeout(write_timeout, emitter.emit(&mut *conn));
    let result = AssertUnwindSafe(write).catch_unwind().await;
    let outcome = match result {
        Ok(Ok(Ok(()))) => Outcome::Ok,
        Ok(Ok(Err(err))) => {
            conn.mark_unhealthy();
            Outcome::failed(ErrorKind::DeviceRejected, err.to_string())
        }
        Ok(Err(_)) => {
            conn.mark_unhealthy();
            Outcome::failed(
                ErrorKind::DeviceRejected,
                format!("write timed out after {write_timeout:?}"),
            )
        }
        Err(_) => {
            conn.mark_unhealthy();
            tracing::error!(ticket = %job.ticket, "emitter panicked, discarding connection");
            Outcome::failed(ErrorKind::Internal, "emitter panicked")
        }
    };
    drop(conn);
    shared.finish(job, outcome);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::time::Instant;
    use tokio_stream::StreamExt;

    use homehub_domain::level::Level;

    use super::*;
    use crate::testing::{Harness, hub, zone};

    fn set(zone: &homehub_domain::zone::Zone, level: f32) -> Command {
        Command::set_level(zone, Level::new(level).unwrap())
    }

    #[tokio::test]
    async fn should_dispatch_single_command_through_one_connection() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 2);
        let z1 = rig.add_zone(&h1, "7");

        let ticket = rig.processor.enqueue(set(&z1, 42.5)).unwrap();
        assert_eq!(ticket.wait().await, Outcome::Ok);

        assert_eq!(rig.recorder.calls(), ["SetLevel(42.5, addr=7)"]);
        assert_eq!(rig.recorder.dials(), 1);
        let stats = rig.pools.get(h1.id).unwrap().stats();
        assert_eq!((stats.in_use, stats.idle), (0, 1));
    }

    #[tokio::test]
    async fn should_complete_commands_in_enqueue_order_per_hub() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 2);
        let h2 = rig.add_hub("h2", 2);
        let z1 = rig.add_zone(&h1, "1");
        let z2 = rig.add_zone(&h2, "2");
        let mut outcomes = rig.processor.subscribe();

        let mut expected_h1 = Vec::new();
        let mut expected_h2 = Vec::new();
        for i in 0..3u8 {
            let level = f32::from(i) * 10.0;
            expected_h1.push(rig.processor.enqueue(set(&z1, level)).unwrap().id());
            expected_h2.push(rig.processor.enqueue(set(&z2, level)).unwrap().id());
        }

        let mut seen_h1 = Vec::new();
        let mut seen_h2 = Vec::new();
        for _ in 0..6 {
            let event = outcomes.next().await.unwrap();
            assert!(event.outcome.is_ok());
            if event.target_device_id == Some(h1.id) {
                seen_h1.push(event.ticket);
            } else {
                seen_h2.push(event.ticket);
            }
        }
        assert_eq!(seen_h1, expected_h1);
        assert_eq!(seen_h2, expected_h2);

        let h1_calls: Vec<_> = rig
            .recorder
            .calls()
            .into_iter()
            .filter(|c| c.ends_with("addr=1)"))
            .collect();
        assert_eq!(
            h1_calls,
            ["SetLevel(0, addr=1)", "SetLevel(10, addr=1)", "SetLevel(20, addr=1)"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_fail_acquisition_when_only_connection_is_busy() {
        let rig = Harness::start(ProcessorConfig {
            acquire_timeout: Duration::from_millis(500),
            ..ProcessorConfig::default()
        });
        let h1 = rig.add_hub("h1", 1);
        let z1 = rig.add_zone(&h1, "7");
        rig.recorder.set_write_delay(Duration::from_secs(2));

        let started = Instant::now();
        let first = rig.processor.enqueue(set(&z1, 10.0)).unwrap();
        let second = rig.processor.enqueue(set(&z1, 20.0)).unwrap();

        let outcome = second.wait().await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::TransportUnavailable));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");

        assert_eq!(first.wait().await, Outcome::Ok);
    }

    #[tokio::test]
    async fn should_reject_write_failure_and_redial() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 1);
        let z1 = rig.add_zone(&h1, "7");

        rig.recorder.fail_writes(true);
        let outcome = rig.processor.submit(set(&z1, 50.0)).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::DeviceRejected));

        rig.recorder.fail_writes(false);
        assert_eq!(rig.processor.submit(set(&z1, 50.0)).await, Outcome::Ok);
        assert_eq!(rig.recorder.dials(), 2);
        let frames = rig.recorder.frames();
        assert_eq!(frames[0].0, 1);
        assert_eq!(frames[1].0, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_write_that_exceeds_timeout() {
        let rig = Harness::start(ProcessorConfig {
            write_timeout: Duration::from_millis(100),
            ..ProcessorConfig::default()
        });
        let h1 = rig.add_hub("h1", 1);
        let z1 = rig.add_zone(&h1, "7");
        rig.recorder.set_write_delay(Duration::from_secs(1));

        let outcome = rig.processor.submit(set(&z1, 50.0)).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::DeviceRejected));
        assert_eq!(rig.pools.get(h1.id).unwrap().stats().idle, 0);
    }

    #[tokio::test]
    async fn should_report_internal_error_when_emitter_panics() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 1);
        let z1 = rig.add_zone(&h1, "7");

        rig.recorder.panic_writes.store(true, Ordering::SeqCst);
        let outcome = rig.processor.submit(set(&z1, 50.0)).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Internal));

        rig.recorder.panic_writes.store(false, Ordering::SeqCst);
        assert_eq!(rig.processor.submit(Command::turn_on(&z1)).await, Outcome::Ok);
        assert_eq!(rig.recorder.dials(), 2);
    }

    #[tokio::test]
    async fn should_reject_unknown_zone_at_enqueue() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 1);
        let unregistered = zone(&h1, "9");

        let err = rig.processor.enqueue(Command::turn_on(&unregistered)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownEntity);
    }

    #[tokio::test]
    async fn should_reject_model_without_builder_at_enqueue() {
        let rig = Harness::start(ProcessorConfig::default());
        let foreign = hub("foreign", "unknown-model", 1);
        rig.registry.add_device(foreign.clone()).unwrap();
        let z = rig.add_zone(&foreign, "1");

        let err = rig.processor.enqueue(Command::turn_off(&z)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn should_fail_when_zone_vanishes_before_dispatch() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 1);
        let z1 = rig.add_zone(&h1, "7");

        let ticket = rig.processor.enqueue(Command::turn_on(&z1)).unwrap();
        rig.registry.remove_device(h1.id).unwrap();
        assert_eq!(ticket.wait().await.error_kind(), Some(ErrorKind::UnknownEntity));
    }

    #[tokio::test]
    async fn should_answer_overloaded_when_intake_is_full() {
        let rig = Harness::start(ProcessorConfig {
            intake_capacity: 1,
            ..ProcessorConfig::default()
        });
        let h1 = rig.add_hub("h1", 1);
        let z1 = rig.add_zone(&h1, "7");

        // The dispatcher cannot run before this task yields.
        let accepted = rig.processor.enqueue(Command::turn_on(&z1)).unwrap();
        let err = rig.processor.enqueue(Command::turn_off(&z1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overloaded);
        assert_eq!(accepted.wait().await, Outcome::Ok);
    }

    #[tokio::test]
    async fn should_fan_out_scene_in_declared_order() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 2);
        let h2 = rig.add_hub("h2", 2);
        let a = rig.add_zone(&h1, "1");
        let b = rig.add_zone(&h2, "2");
        let c = rig.add_zone(&h1, "3");

        let nested = Scene::builder()
            .name("Nested")
            .command(Command::turn_off(&c))
            .build()
            .unwrap();
        let scene = Scene::builder()
            .name("Evening")
            .command(set(&a, 30.0))
            .command(set(&b, 60.0))
            .command(Command::activate(&nested))
            .command(Command::turn_on(&a))
            .build()
            .unwrap();
        rig.registry.add_scene(nested).unwrap();
        rig.registry.add_scene(scene.clone()).unwrap();

        let outcome = rig.processor.submit(Command::activate(&scene)).await;
        assert_eq!(outcome, Outcome::Ok);

        let h1_calls: Vec<_> = rig
            .recorder
            .calls()
            .into_iter()
            .filter(|c| !c.ends_with("addr=2)"))
            .collect();
        assert_eq!(
            h1_calls,
            ["SetLevel(30, addr=1)", "SetLevel(0, addr=3)", "SetLevel(100, addr=1)"]
        );
        assert!(rig.recorder.calls().contains(&"SetLevel(60, addr=2)".to_string()));
    }

    #[tokio::test]
    async fn should_fail_scene_with_kind_of_first_failed_constituent() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 1);
        let ok = rig.add_zone(&h1, "1");
        let foreign = hub("foreign", "unknown-model", 1);
        rig.registry.add_device(foreign.clone()).unwrap();
        let unsupported = rig.add_zone(&foreign, "2");

        let scene = Scene::builder()
            .name("Mixed")
            .command(Command::turn_on(&ok))
            .command(Command::turn_on(&unsupported))
            .build()
            .unwrap();
        rig.registry.add_scene(scene.clone()).unwrap();

        let outcome = rig.processor.submit(Command::activate(&scene)).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Unsupported));
        assert_eq!(rig.recorder.calls(), ["SetLevel(100, addr=1)"]);
    }

    #[tokio::test]
    async fn should_publish_outcome_for_every_scene_constituent() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 1);
        let ok = rig.add_zone(&h1, "1");
        let foreign = hub("foreign", "unknown-model", 1);
        rig.registry.add_device(foreign.clone()).unwrap();
        let unsupported = rig.add_zone(&foreign, "2");
        let missing = homehub_domain::id::SceneId::new();

        let scene = Scene::builder()
            .name("Mixed")
            .command(Command::turn_on(&ok))
            .command(Command::turn_on(&unsupported))
            .command(Command::SceneSet { scene_id: missing, scene_name: "Gone".to_string() })
            .build()
            .unwrap();
        rig.registry.add_scene(scene.clone()).unwrap();
        let mut events = rig.bus.subscribe_outcomes();

        let ticket = rig.processor.enqueue(Command::activate(&scene)).unwrap();
        let scene_ticket = ticket.id();
        let outcome = ticket.wait().await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Unsupported));

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(events.next().await.unwrap());
        }
        let last = seen.pop().unwrap();
        assert_eq!(last.ticket, scene_ticket);
        assert_eq!(last.command_kind, homehub_domain::command::CommandKind::SceneSet);

        let mut failures: Vec<_> = seen.iter().filter_map(|e| e.outcome.error_kind()).collect();
        failures.sort_by_key(|kind| format!("{kind:?}"));
        assert_eq!(failures, [ErrorKind::UnknownEntity, ErrorKind::Unsupported]);
        assert_eq!(seen.iter().filter(|e| e.outcome.is_ok()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_publish_build_failure_after_previous_write_on_same_hub() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 2);
        let z1 = rig.add_zone(&h1, "7");
        rig.recorder.set_write_delay(Duration::from_secs(1));
        let mut events = rig.processor.subscribe();

        let first = rig.processor.enqueue(set(&z1, 10.0)).unwrap().id();
        tokio::time::sleep(Duration::from_millis(100)).await;
        rig.recorder.fail_builds.store(true, Ordering::SeqCst);
        let second = rig.processor.enqueue(set(&z1, 20.0)).unwrap().id();

        let event = events.next().await.unwrap();
        assert_eq!(event.ticket, first);
        assert!(event.outcome.is_ok());
        let event = events.next().await.unwrap();
        assert_eq!(event.ticket, second);
        assert_eq!(event.outcome.error_kind(), Some(ErrorKind::Unsupported));
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_start_acquired_write_once_shutting_down() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 2);
        let z1 = rig.add_zone(&h1, "7");
        rig.recorder.set_write_delay(Duration::from_secs(1));

        let first = rig.processor.enqueue(set(&z1, 10.0)).unwrap();
        let second = rig.processor.enqueue(set(&z1, 20.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rig.pools.get(h1.id).unwrap().stats().in_use, 2);

        rig.processor.shutdown().await;

        assert_eq!(first.wait().await, Outcome::Ok);
        assert_eq!(second.wait().await.error_kind(), Some(ErrorKind::Shutdown));
        assert_eq!(rig.recorder.calls(), ["SetLevel(10, addr=7)"]);
        assert_eq!(rig.pools.get(h1.id).unwrap().stats().in_use, 0);
    }

    #[tokio::test]
    async fn should_stop_expanding_cyclic_scenes() {
        let rig = Harness::start(ProcessorConfig::default());
        let a_id = homehub_domain::id::SceneId::new();
        let b_id = homehub_domain::id::SceneId::new();
        let a = Scene::builder()
            .id(a_id)
            .name("A")
            .command(Command::SceneSet { scene_id: b_id, scene_name: "B".to_string() })
            .build()
            .unwrap();
        let b = Scene::builder()
            .id(b_id)
            .name("B")
            .command(Command::SceneSet { scene_id: a_id, scene_name: "A".to_string() })
            .build()
            .unwrap();
        rig.registry.add_scene(a.clone()).unwrap();
        rig.registry.add_scene(b).unwrap();

        let outcome = rig.processor.submit(Command::activate(&a)).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Unsupported));
    }

    #[tokio::test(start_paused = true)]
    async fn should_resolve_queued_commands_with_shutdown() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 1);
        let z1 = rig.add_zone(&h1, "7");
        rig.recorder.set_write_delay(Duration::from_secs(1));

        let in_flight = rig.processor.enqueue(set(&z1, 10.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let queued = rig.processor.enqueue(set(&z1, 20.0)).unwrap();

        rig.processor.shutdown().await;

        assert_eq!(in_flight.wait().await, Outcome::Ok);
        assert_eq!(queued.wait().await.error_kind(), Some(ErrorKind::Shutdown));
        assert_eq!(rig.pools.get(h1.id).unwrap().stats().in_use, 0);

        let err = rig.processor.enqueue(set(&z1, 30.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Shutdown);
        assert!(rig.processor.is_closing());
    }

    #[tokio::test]
    async fn should_publish_outcome_with_target_address() {
        let rig = Harness::start(ProcessorConfig::default());
        let h1 = rig.add_hub("h1", 1);
        let z1 = rig.add_zone(&h1, "7");
        let mut events = rig.bus.subscribe_outcomes();

        let ticket = rig.processor.enqueue(Command::turn_on(&z1)).unwrap();
        let id = ticket.id();
        drop(ticket);

        let event = events.next().await.unwrap();
        assert_eq!(event.ticket, id);
        assert_eq!(event.target_address.as_deref(), Some("7"));
        assert_eq!(event.command_kind, homehub_domain::command::CommandKind::ZoneTurnOn);
    }
}

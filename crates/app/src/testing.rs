//! Hand-written stubs shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use homehub_domain::command::Command;
use homehub_domain::device::{ConnectionInfo, Device};
use homehub_domain::error::CommandError;
use homehub_domain::zone::Zone;

use crate::event_bus::EventBus;
use crate::extensions::{ExtensionRegistry, RegistrationError};
use crate::pool::{PoolConfig, PoolSet};
use crate::ports::{CommandBuilder, Connection, Emitter, Extension, NetworkDriver, TransportError};
use crate::processor::{CommandProcessor, ProcessorConfig};
use crate::registry::{Catalog, DeviceRegistry};

pub(crate) const STUB_MODEL: &str = "stub-model";
pub(crate) const STUB_NETWORK: &str = "stub";

/// Records what the stub builder and network saw, and steers their behaviour.
#[derive(Default)]
pub(crate) struct Recorder {
    calls: Mutex<Vec<String>>,
    frames: Mutex<Vec<(usize, String)>>,
    dials: AtomicUsize,
    write_delay: Mutex<Duration>,
    pub fail_writes: AtomicBool,
    pub panic_writes: AtomicBool,
    pub fail_builds: AtomicBool,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// `(connection number, frame)` pairs, in write order.
    pub fn frames(&self) -> Vec<(usize, String)> {
        self.frames.lock().unwrap().clone()
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

pub(crate) struct StubBuilder(pub Arc<Recorder>);

impl CommandBuilder for StubBuilder {
    fn id(&self) -> &str {
        STUB_MODEL
    }

    fn build(&self, command: &Command, _: &Catalog) -> Result<Box<dyn Emitter>, CommandError> {
        if self.0.fail_builds.load(Ordering::SeqCst) {
            return Err(CommandError::unsupported("stub builder refused the command"));
        }
        let call = if let Some((zone, level)) = command.zone_level() {
            format!("SetLevel({}, addr={})", level.value(), zone.address)
        } else {
            match command {
                Command::ButtonPress { button } => {
                    format!("Press({}, {})", button.device_address, button.button_address)
                }
                Command::ButtonRelease { button } => {
                    format!("Release({}, {})", button.device_address, button.button_address)
                }
                _ => return Err(CommandError::unsupported("stub cannot encode this command")),
            }
        };
        Ok(Box::new(StubEmitter {
            call,
            recorder: Arc::clone(&self.0),
        }))
    }
}

struct StubEmitter {
    call: String,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Emitter for StubEmitter {
    async fn emit(&self, conn: &mut dyn Connection) -> Result<(), TransportError> {
        let delay = *self.recorder.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        assert!(
            !self.recorder.panic_writes.load(Ordering::SeqCst),
            "stub emitter asked to panic"
        );
        conn.send(self.call.as_bytes()).await?;
        if self.recorder.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Protocol("stub device rejected write".to_string()));
        }
        self.recorder.calls.lock().unwrap().push(self.call.clone());
        Ok(())
    }
}

pub(crate) struct StubNetwork(pub Arc<Recorder>);

#[async_trait]
impl NetworkDriver for StubNetwork {
    fn kind(&self) -> &str {
        STUB_NETWORK
    }

    async fn dial(&self, _: &ConnectionInfo) -> Result<Box<dyn Connection>, TransportError> {
        let id = self.0.dials.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(StubConn {
            id,
            recorder: Arc::clone(&self.0),
        }))
    }
}

struct StubConn {
    id: usize,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Connection for StubConn {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let frame = String::from_utf8_lossy(frame).into_owned();
        self.recorder.frames.lock().unwrap().push((self.id, frame));
        Ok(())
    }
}

pub(crate) struct StubExtension(pub Arc<Recorder>);

impl Extension for StubExtension {
    fn name(&self) -> &str {
        "stub"
    }

    fn register(&self, registry: &mut ExtensionRegistry) -> Result<(), RegistrationError> {
        registry.register_builder(Arc::new(StubBuilder(Arc::clone(&self.0))))?;
        registry.register_network(Arc::new(StubNetwork(Arc::clone(&self.0))))
    }
}

pub(crate) fn hub(name: &str, model: &str, capacity: usize) -> Device {
    Device::builder()
        .name(name)
        .local_id("1")
        .model_number(model)
        .connection(ConnectionInfo::new(STUB_NETWORK, format!("{name}:23")).with_pool_size(capacity))
        .build()
        .unwrap()
}

pub(crate) fn zone(device: &Device, address: &str) -> Zone {
    Zone::builder()
        .name(format!("zone {address}"))
        .address(address)
        .device_id(device.id)
        .build()
        .unwrap()
}

/// A processor wired to the stub extension.
pub(crate) struct Harness {
    pub registry: Arc<DeviceRegistry>,
    pub pools: Arc<PoolSet>,
    pub bus: EventBus,
    pub recorder: Arc<Recorder>,
    pub processor: Arc<CommandProcessor>,
}

impl Harness {
    pub fn start(config: ProcessorConfig) -> Self {
        let recorder = Arc::new(Recorder::default());
        let mut extensions = ExtensionRegistry::new();
        extensions.load(&StubExtension(Arc::clone(&recorder))).unwrap();
        let extensions = Arc::new(extensions);
        let registry = Arc::new(DeviceRegistry::new());
        let bus = EventBus::default();
        let pools = Arc::new(PoolSet::new(
            Arc::clone(&extensions),
            bus.clone(),
            PoolConfig::default(),
        ));
        let processor = Arc::new(CommandProcessor::start(
            Arc::clone(&registry),
            extensions,
            Arc::clone(&pools),
            bus.clone(),
            config,
        ));
        Self {
            registry,
            pools,
            bus,
            recorder,
            processor,
        }
    }

    pub fn add_hub(&self, name: &str, capacity: usize) -> Device {
        let hub = hub(name, STUB_MODEL, capacity);
        self.registry.add_device(hub.clone()).unwrap();
        hub
    }

    pub fn add_zone(&self, device: &Device, address: &str) -> Zone {
        let zone = zone(device, address);
        self.registry.add_zone(zone.clone()).unwrap();
        zone
    }
}

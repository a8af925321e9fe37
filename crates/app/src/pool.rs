//! Per-hub connection pools.
//!
//! A [`ConnectionPool`] holds at most `capacity` live connections to one hub,
//! counting idle connections, connections handed out and slots reserved for
//! an in-progress dial. Acquisition returns a [`PooledConnection`] guard that
//! releases the connection on every exit path.
//!
//! Acquisition order:
//! 1. reuse an idle connection if its liveness check passes;
//! 2. otherwise dial, if there is spare capacity;
//! 3. otherwise queue as a waiter. Releases serve waiters oldest first: a
//!    healthy connection is handed over directly, a discarded one hands over
//!    its slot so the waiter can dial.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;

use homehub_domain::device::{ConnectionInfo, Device};
use homehub_domain::error::{CommandError, ErrorKind};
use homehub_domain::event::{ConnectionState, Event};
use homehub_domain::id::DeviceId;

use crate::event_bus::EventBus;
use crate::extensions::ExtensionRegistry;
use crate::ports::{Connection, NetworkDriver, TransportError};

/// Timeouts shared by every pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub dial_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(3),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no connection available within {0:?}")]
    TimedOut(Duration),

    #[error("dial failed: {0}")]
    DialFailed(#[source] TransportError),

    #[error("pool is closed")]
    Closed,
}

impl From<PoolError> for CommandError {
    fn from(err: PoolError) -> Self {
        let kind = match err {
            PoolError::TimedOut(_) | PoolError::DialFailed(_) => ErrorKind::TransportUnavailable,
            PoolError::Closed => ErrorKind::Shutdown,
        };
        Self::new(kind, err.to_string())
    }
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub in_use: usize,
    pub waiters: usize,
}

enum Handoff {
    Conn(PooledConnection),
    Slot(Reservation),
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Box<dyn Connection>>,
    /// Connections handed out plus slots reserved for dialing.
    in_use: usize,
    waiters: VecDeque<oneshot::Sender<Handoff>>,
    closed: bool,
}

pub struct ConnectionPool {
    hub_id: DeviceId,
    info: ConnectionInfo,
    capacity: usize,
    driver: Arc<dyn NetworkDriver>,
    config: PoolConfig,
    bus: EventBus,
    state: Mutex<PoolState>,
    drained: Notify,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("hub_id", &self.hub_id)
            .field("network", &self.info.network)
            .field("address", &self.info.address)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    #[must_use]
    pub fn new(
        hub_id: DeviceId,
        info: ConnectionInfo,
        driver: Arc<dyn NetworkDriver>,
        config: PoolConfig,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            hub_id,
            capacity: info.pool_size.max(1),
            info,
            driver,
            config,
            bus,
            state: Mutex::new(PoolState::default()),
            drained: Notify::new(),
        })
    }

    #[must_use]
    pub fn hub_id(&self) -> DeviceId {
        self.hub_id
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: ConnectionState) {
        self.bus.publish(Event::connection(self.hub_id, state));
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            capacity: self.capacity,
            idle: state.idle.len(),
            in_use: state.in_use,
            waiters: state.waiters.iter().filter(|tx| !tx.is_closed()).count(),
        }
    }

    /// Acquire a connection, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`PoolError::TimedOut`] when no connection was available in time
    /// - [`PoolError::DialFailed`] when a new connection could not be opened
    /// - [`PoolError::Closed`] once [`close`](Self::close) has been called
    #[tracing::instrument(skip(self), fields(hub = %self.hub_id))]
    pub async fn get(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection, PoolError> {
        let deadline = Instant::now() + timeout;

        let slot = match self.reserve()? {
            Reserve::Idle(mut conn) => {
                let slot = Reservation::new(Arc::clone(self));
                if conn.is_alive().await {
                    return Ok(slot.fill(conn));
                }
                tracing::debug!("idle connection failed liveness check, discarding");
                drop(conn);
                self.publish(ConnectionState::Disconnected);
                slot
            }
            Reserve::Dial => Reservation::new(Arc::clone(self)),
            Reserve::Wait(mut rx) => match tokio::time::timeout_at(deadline, &mut rx).await {
                Ok(Ok(Handoff::Conn(conn))) => return Ok(conn),
                Ok(Ok(Handoff::Slot(slot))) => slot,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => {
                    // A release may have raced the deadline.
                    rx.close();
                    return match rx.try_recv() {
                        Ok(Handoff::Conn(conn)) => Ok(conn),
                        Ok(Handoff::Slot(_)) | Err(_) => Err(PoolError::TimedOut(timeout)),
                    };
                }
            },
        };

        self.dial(slot, deadline, timeout).await
    }

    fn reserve(&self) -> Result<Reserve, PoolError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(conn) = state.idle.pop_front() {
            state.in_use += 1;
            return Ok(Reserve::Idle(conn));
        }
        if state.in_use + state.idle.len() < self.capacity {
            state.in_use += 1;
            return Ok(Reserve::Dial);
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        Ok(Reserve::Wait(rx))
    }

    async fn dial(
        &self,
        slot: Reservation,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<PooledConnection, PoolError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = self.config.dial_timeout.min(remaining);

        match tokio::time::timeout(budget, self.driver.dial(&self.info)).await {
            Ok(Ok(conn)) => {
                tracing::debug!(address = %self.info.address, "connection established");
                self.publish(ConnectionState::Connected);
                Ok(slot.fill(conn))
            }
            Ok(Err(err)) => {
                tracing::warn!(address = %self.info.address, error = %err, "dial failed");
                self.publish(ConnectionState::DialFailed);
                Err(PoolError::DialFailed(err))
            }
            Err(_) => {
                tracing::warn!(address = %self.info.address, ?budget, "dial timed out");
                self.publish(ConnectionState::DialFailed);
                if budget < remaining {
                    Err(PoolError::DialFailed(TransportError::Timeout(budget)))
                } else {
                    Err(PoolError::TimedOut(timeout))
                }
            }
        }
    }

    /// Return a connection. Healthy connections go to the oldest waiter or
    /// back to idle; unhealthy ones are closed and their slot freed.
    fn release(self: &Arc<Self>, conn: Box<dyn Connection>, healthy: bool) {
        let mut state = self.lock();
        if healthy && !state.closed {
            let handoff = Handoff::Conn(PooledConnection::new(Arc::clone(self), conn));
            match hand_off(&mut state.waiters, handoff) {
                None => {}
                Some(Handoff::Conn(back)) => {
                    state.in_use -= 1;
                    state.idle.push_back(back.disarm());
                }
                Some(Handoff::Slot(back)) => back.disarm(),
            }
            return;
        }
        drop(state);
        drop(conn);
        self.publish(ConnectionState::Disconnected);
        self.release_slot();
    }

    /// Free a slot that holds no connection.
    fn release_slot(self: &Arc<Self>) {
        let mut state = self.lock();
        if !state.closed {
            let handoff = Handoff::Slot(Reservation::new(Arc::clone(self)));
            match hand_off(&mut state.waiters, handoff) {
                None => return,
                Some(Handoff::Slot(back)) => back.disarm(),
                Some(Handoff::Conn(back)) => drop(back.disarm()),
            }
        }
        state.in_use = state.in_use.saturating_sub(1);
        drop(state);
        self.drained.notify_waiters();
    }

    /// Refuse new acquisitions, fail waiters, drop idle connections and wait
    /// up to `grace` for connections in use to come back.
    ///
    /// Connections released after the grace period are discarded.
    #[tracing::instrument(skip(self), fields(hub = %self.hub_id))]
    pub async fn close(&self, grace: Duration) {
        let idle = {
            let mut state = self.lock();
            state.closed = true;
            state.waiters.clear();
            std::mem::take(&mut state.idle)
        };
        if !idle.is_empty() {
            drop(idle);
            self.publish(ConnectionState::Disconnected);
        }

        let drained = async {
            loop {
                let notified = self.drained.notified();
                if self.lock().in_use == 0 {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(grace, drained).await.is_err() {
            tracing::warn!(
                in_use = self.lock().in_use,
                "connections still in use after grace period, forcing close"
            );
        }
    }
}

enum Reserve {
    Idle(Box<dyn Connection>),
    Dial,
    Wait(oneshot::Receiver<Handoff>),
}

/// Give `handoff` to the oldest live waiter; returns it if nobody took it.
fn hand_off(waiters: &mut VecDeque<oneshot::Sender<Handoff>>, mut handoff: Handoff) -> Option<Handoff> {
    while let Some(tx) = waiters.pop_front() {
        match tx.send(handoff) {
            Ok(()) => return None,
            Err(back) => handoff = back,
        }
    }
    Some(handoff)
}

/// A counted slot with no connection yet. Dropping it frees the slot.
struct Reservation {
    pool: Arc<ConnectionPool>,
    armed: bool,
}

impl Reservation {
    fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool, armed: true }
    }

    fn fill(mut self, conn: Box<dyn Connection>) -> PooledConnection {
        self.armed = false;
        PooledConnection::new(Arc::clone(&self.pool), conn)
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

/// Guard over an acquired connection.
///
/// Dropping the guard releases the connection; it is discarded instead of
/// reused when [`mark_unhealthy`](Self::mark_unhealthy) was called or the
/// thread is panicking.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Box<dyn Connection>,
    healthy: bool,
    armed: bool,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("hub_id", &self.pool.hub_id)
            .field("healthy", &self.healthy)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    fn new(pool: Arc<ConnectionPool>, conn: Box<dyn Connection>) -> Self {
        Self {
            pool,
            conn,
            healthy: true,
            armed: true,
        }
    }

    /// Discard the connection on release.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    fn disarm(mut self) -> Box<dyn Connection> {
        self.armed = false;
        std::mem::replace(&mut self.conn, Box::new(Detached))
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let healthy = self.healthy && !std::thread::panicking();
        let conn = std::mem::replace(&mut self.conn, Box::new(Detached));
        self.pool.release(conn, healthy);
    }
}

/// Placeholder left behind once a guard's connection has been taken.
struct Detached;

#[async_trait]
impl Connection for Detached {
    async fn send(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Closed)
    }

    async fn is_alive(&mut self) -> bool {
        false
    }
}

/// The pools of every hub seen so far, created on first demand.
pub struct PoolSet {
    extensions: Arc<ExtensionRegistry>,
    bus: EventBus,
    config: PoolConfig,
    state: Mutex<PoolSetState>,
}

#[derive(Default)]
struct PoolSetState {
    pools: HashMap<DeviceId, Arc<ConnectionPool>>,
    closed: bool,
}

impl fmt::Debug for PoolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSet")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PoolSet {
    #[must_use]
    pub fn new(extensions: Arc<ExtensionRegistry>, bus: EventBus, config: PoolConfig) -> Self {
        Self {
            extensions,
            bus,
            config,
            state: Mutex::new(PoolSetState::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolSetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pool for `hub`, creating it on first use.
    ///
    /// # Errors
    ///
    /// - `Shutdown` once the set is closed
    /// - `Internal` when `hub` carries no connection descriptor
    /// - `TransportUnavailable` when no driver handles its network kind
    pub fn pool_for(&self, hub: &Device) -> Result<Arc<ConnectionPool>, CommandError> {
        let mut state = self.lock();
        if state.closed {
            return Err(CommandError::shutdown());
        }
        if let Some(pool) = state.pools.get(&hub.id) {
            return Ok(Arc::clone(pool));
        }
        let info = hub.connection.clone().ok_or_else(|| {
            CommandError::new(
                ErrorKind::Internal,
                format!("hub {} has no connection descriptor", hub.id),
            )
        })?;
        let driver = self.extensions.network(&info.network).ok_or_else(|| {
            CommandError::new(
                ErrorKind::TransportUnavailable,
                TransportError::UnknownNetwork(info.network.clone()).to_string(),
            )
        })?;
        tracing::debug!(hub = %hub.id, network = %info.network, capacity = info.pool_size, "creating connection pool");
        let pool = ConnectionPool::new(hub.id, info, driver, self.config, self.bus.clone());
        state.pools.insert(hub.id, Arc::clone(&pool));
        Ok(pool)
    }

    #[must_use]
    pub fn get(&self, hub_id: DeviceId) -> Option<Arc<ConnectionPool>> {
        self.lock().pools.get(&hub_id).cloned()
    }

    /// Close every pool concurrently, each with the configured grace.
    pub async fn close_all(&self) {
        let pools: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.pools.values().cloned().collect()
        };
        let grace = self.config.shutdown_grace;
        futures::future::join_all(pools.iter().map(|pool| pool.close(grace))).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Spy {
        dials: AtomicUsize,
        alive: AtomicBool,
        fail_dial: AtomicBool,
    }

    struct SpyConn(Arc<Spy>);

    #[async_trait]
    impl Connection for SpyConn {
        async fn send(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn is_alive(&mut self) -> bool {
            self.0.alive.load(Ordering::SeqCst)
        }
    }

    struct SpyDriver(Arc<Spy>);

    #[async_trait]
    impl NetworkDriver for SpyDriver {
        fn kind(&self) -> &str {
            "spy"
        }

        async fn dial(&self, _: &ConnectionInfo) -> Result<Box<dyn Connection>, TransportError> {
            self.0.dials.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_dial.load(Ordering::SeqCst) {
                return Err(TransportError::Protocol("refused".to_string()));
            }
            Ok(Box::new(SpyConn(Arc::clone(&self.0))))
        }
    }

    fn pool(capacity: usize) -> (Arc<ConnectionPool>, Arc<Spy>) {
        let spy = Arc::new(Spy::default());
        spy.alive.store(true, Ordering::SeqCst);
        let pool = ConnectionPool::new(
            DeviceId::new(),
            ConnectionInfo::new("spy", "test:1").with_pool_size(capacity),
            Arc::new(SpyDriver(Arc::clone(&spy))),
            PoolConfig::default(),
            EventBus::default(),
        );
        (pool, spy)
    }

    async fn wait_for_waiters(pool: &ConnectionPool, count: usize) {
        while pool.stats().waiters < count {
            tokio::task::yield_now().await;
        }
    }

    fn assert_bounded(pool: &ConnectionPool) {
        let stats = pool.stats();
        assert!(stats.in_use + stats.idle <= stats.capacity, "{stats:?}");
    }

    #[tokio::test]
    async fn should_reuse_idle_connection() {
        let (pool, spy) = pool(2);
        drop(pool.get(Duration::from_secs(1)).await.unwrap());
        drop(pool.get(Duration::from_secs(1)).await.unwrap());
        assert_eq!(spy.dials.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn should_discard_idle_connection_failing_liveness() {
        let (pool, spy) = pool(1);
        drop(pool.get(Duration::from_secs(1)).await.unwrap());
        spy.alive.store(false, Ordering::SeqCst);
        let conn = pool.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(spy.dials.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().in_use, 1);
        drop(conn);
    }

    #[tokio::test]
    async fn should_dial_fresh_connection_after_unhealthy_release() {
        let (pool, spy) = pool(1);
        let mut conn = pool.get(Duration::from_secs(1)).await.unwrap();
        conn.mark_unhealthy();
        drop(conn);
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().in_use, 0);
        drop(pool.get(Duration::from_secs(1)).await.unwrap());
        assert_eq!(spy.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_when_capacity_is_exhausted() {
        let (pool, _) = pool(1);
        let held = pool.get(Duration::from_secs(1)).await.unwrap();
        let started = Instant::now();
        let result = pool.get(Duration::from_millis(500)).await;
        assert!(matches!(result, Err(PoolError::TimedOut(_))));
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(pool.stats().waiters, 0);
        drop(held);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_hand_released_connection_to_oldest_waiter() {
        let (pool, spy) = pool(1);
        let held = pool.get(Duration::from_secs(1)).await.unwrap();

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
        for waiter in 0..2 {
            let task_pool = Arc::clone(&pool);
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let conn = task_pool.get(Duration::from_secs(5)).await.unwrap();
                order_tx.send(waiter).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                drop(conn);
            });
            wait_for_waiters(&pool, waiter + 1).await;
        }

        drop(held);
        assert_eq!(order_rx.recv().await, Some(0));
        assert_eq!(order_rx.recv().await, Some(1));
        assert_eq!(spy.dials.load(Ordering::SeqCst), 1);
        assert_bounded(&pool);
    }

    #[tokio::test(start_paused = true)]
    async fn should_hand_freed_slot_to_waiter_on_unhealthy_release() {
        let (pool, spy) = pool(1);
        let mut held = pool.get(Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get(Duration::from_secs(5)).await.map(drop) })
        };
        wait_for_waiters(&pool, 1).await;

        held.mark_unhealthy();
        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(spy.dials.load(Ordering::SeqCst), 2);
        assert_bounded(&pool);
    }

    #[tokio::test]
    async fn should_report_dial_failure_and_free_slot() {
        let (pool, spy) = pool(1);
        spy.fail_dial.store(true, Ordering::SeqCst);
        let result = pool.get(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PoolError::DialFailed(_))));
        assert_eq!(pool.stats().in_use, 0);

        let err: CommandError = PoolError::DialFailed(TransportError::Closed).into();
        assert_eq!(err.kind, ErrorKind::TransportUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn should_refuse_acquisition_and_fail_waiters_after_close() {
        let (pool, _) = pool(1);
        let held = pool.get(Duration::from_secs(1)).await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get(Duration::from_secs(5)).await.map(drop) })
        };
        wait_for_waiters(&pool, 1).await;

        let closing = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.close(Duration::from_secs(10)).await })
        };
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
        assert!(matches!(
            pool.get(Duration::from_secs(1)).await,
            Err(PoolError::Closed)
        ));

        drop(held);
        closing.await.unwrap();
        let stats = pool.stats();
        assert_eq!((stats.idle, stats.in_use), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn should_force_close_after_grace_period() {
        let (pool, _) = pool(1);
        let held = pool.get(Duration::from_secs(1)).await.unwrap();
        let started = Instant::now();
        pool.close(Duration::from_secs(2)).await;
        assert!(started.elapsed() >= Duration::from_secs(2));
        drop(held);
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().in_use, 0);
    }
}

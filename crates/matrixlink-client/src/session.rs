//! Reconnecting device session
//!
//! A [`ConnectionSession`] owns the lifetime of the device connection: it
//! connects, walks the root directory to prove the device answers, announces
//! the new connection to its [`SessionHandler`]s, probes liveness on an
//! interval and reconnects with exponential backoff when anything fails.
//!
//! Every connection gets a fresh epoch. Work started for an older epoch can
//! check [`EpochToken::is_current`] and drop its results.

use async_trait::async_trait;
use futures::future::join_all;
use matrixlink_core::{Element, TreePath};
use matrixlink_transport::{TcpTransport, TransportReceiver, TransportSender};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::{TreeClient, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{ClientError, Result};
use crate::tree::{ElementTree, UpdateCallback};

/// Connected transport halves
pub type TransportPair = (Arc<dyn TransportSender>, Box<dyn TransportReceiver>);

/// Opens transport connections to the device
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<TransportPair>;
}

/// Default connector over TCP
#[derive(Default)]
pub struct TcpConnector {
    transport: TcpTransport,
}

impl TcpConnector {
    pub fn new(transport: TcpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> Result<TransportPair> {
        let (sender, receiver) = self.transport.connect(addr).await?;
        Ok((Arc::new(sender), Box::new(receiver)))
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Monotonic connection counter
#[derive(Debug, Clone, Default)]
pub struct EpochCounter(Arc<AtomicU64>);

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Start a new epoch, invalidating all earlier tokens
    pub fn advance(&self) -> EpochToken {
        let value = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        EpochToken {
            value,
            counter: self.clone(),
        }
    }

    /// Token for the current epoch
    pub fn token(&self) -> EpochToken {
        EpochToken {
            value: self.current(),
            counter: self.clone(),
        }
    }
}

/// Identifies one connection epoch
#[derive(Debug, Clone)]
pub struct EpochToken {
    value: u64,
    counter: EpochCounter,
}

impl EpochToken {
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn is_current(&self) -> bool {
        self.counter.current() == self.value
    }
}

/// Handed to handlers for every new connection
#[derive(Clone)]
pub struct SessionContext {
    pub client: Arc<TreeClient>,
    pub epoch: EpochToken,
}

/// Reacts to connection lifecycle
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Called once per successful connection, after the root walk. Runs on its
    /// own task and is aborted when the connection ends.
    async fn on_connected(&self, ctx: SessionContext);

    /// Called after a connection has been torn down
    fn on_disconnected(&self, _epoch: u64) {}

    /// Called on every state transition
    fn on_state(&self, _state: SessionState) {}
}

/// Session timing
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device address (`host:port`)
    pub addr: String,
    pub request_timeout: Duration,
    pub probe_interval: Duration,
    /// Path resolved by the liveness probe
    pub probe_path: TreePath,
    pub reconnect_interval: Duration,
    pub reconnect_max_interval: Duration,
}

impl SessionConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_interval: Duration::from_secs(3),
            probe_path: TreePath::from_segments(vec![1]),
            reconnect_interval: Duration::from_secs(1),
            reconnect_max_interval: Duration::from_secs(30),
        }
    }
}

/// Shortest delay between connect attempts
pub const MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(10);

/// Doubling delay with an upper bound
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// `initial` is floored at [`MIN_RECONNECT_INTERVAL`]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_RECONNECT_INTERVAL);
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Supervises the device connection
pub struct ConnectionSession {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    state: watch::Sender<SessionState>,
    client: RwLock<Option<Arc<TreeClient>>>,
    epoch: EpochCounter,
    handlers: RwLock<Vec<Arc<dyn SessionHandler>>>,
    handler_tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            connector,
            state,
            client: RwLock::new(None),
            epoch: EpochCounter::new(),
            handlers: RwLock::new(Vec::new()),
            handler_tasks: Mutex::new(Vec::new()),
            shutdown,
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn add_handler(&self, handler: Arc<dyn SessionHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Token for the current connection epoch
    pub fn epoch(&self) -> EpochToken {
        self.epoch.token()
    }

    /// Shared handle on the epoch counter
    pub fn epochs(&self) -> EpochCounter {
        self.epoch.clone()
    }

    /// Client of the live connection, if any
    pub fn client(&self) -> Option<Arc<TreeClient>> {
        self.client.read().clone()
    }

    /// Start the connect loop. Calling it again while running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.shutdown.send_replace(false);
        let session = Arc::clone(self);
        *task = Some(tokio::spawn(session.run()));
    }

    /// Stop the connect loop and drop the connection
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.teardown().await;
        self.set_state(SessionState::Disconnected);
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut backoff = Backoff::new(
            self.config.reconnect_interval,
            self.config.reconnect_max_interval,
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(SessionState::Connecting);
            let epoch = self.epoch.advance();

            let attempt = tokio::select! {
                attempt = self.connect_once(&epoch) => attempt,
                _ = shutdown.changed() => {
                    debug!("Connect to {} abandoned for shutdown", self.config.addr);
                    break;
                }
            };

            match attempt {
                Ok(client) => {
                    backoff.reset();
                    let reason = self.supervise(&client, &mut shutdown).await;
                    info!("Connection {} ended: {}", epoch.value(), reason);
                    self.teardown().await;
                }
                Err(e) => {
                    warn!("Connect to {} failed: {}", self.config.addr, e);
                }
            }

            if *shutdown.borrow() {
                break;
            }
            self.set_state(SessionState::Disconnected);

            let delay = backoff.next_delay();
            debug!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.teardown().await;
        self.set_state(SessionState::Disconnected);
    }

    /// Connect, walk the root and announce the connection
    async fn connect_once(&self, epoch: &EpochToken) -> Result<Arc<TreeClient>> {
        info!("Connecting to {}", self.config.addr);
        let (sender, receiver) = self.connector.connect(&self.config.addr).await?;
        let client = Arc::new(TreeClient::new(
            sender,
            receiver,
            self.config.request_timeout,
        ));

        match client.get_directory(&TreePath::root()).await {
            Ok((_, children)) => {
                debug!("Root walk found {} elements", children.len());
            }
            Err(e) => {
                client.close().await;
                return Err(ClientError::ConnectionFailed(format!("root walk failed: {}", e)));
            }
        }

        *self.client.write() = Some(client.clone());
        self.set_state(SessionState::Connected);
        info!("Connected to {} (epoch {})", self.config.addr, epoch.value());

        let ctx = SessionContext {
            client: client.clone(),
            epoch: epoch.clone(),
        };
        let handlers = self.handlers.read().clone();
        let mut tasks = self.handler_tasks.lock();
        for handler in handlers {
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                handler.on_connected(ctx).await;
            }));
        }

        Ok(client)
    }

    /// Watch a live connection until it closes, a probe fails or we shut down
    async fn supervise(&self, client: &TreeClient, shutdown: &mut watch::Receiver<bool>) -> String {
        let period = self.config.probe_interval;
        let mut probe = interval_at(Instant::now() + period, period);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                reason = client.closed() => return reason,
                _ = probe.tick() => {
                    if let Err(e) = client.get_element(&self.config.probe_path).await {
                        if e.is_connection_level() || matches!(e, ClientError::Timeout) {
                            return format!("liveness probe failed: {}", e);
                        }
                        // The device answered, even if only with an error
                        debug!("Probe of {} answered with {}", self.config.probe_path, e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return "shutdown".to_string();
                    }
                }
            }
        }
    }

    /// Drop the live connection and everything tied to it
    async fn teardown(&self) {
        let tasks: Vec<_> = self.handler_tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        // aborted handlers must be gone before the client closes
        join_all(tasks).await;
        let client = self.client.write().take();
        if let Some(client) = client {
            client.close().await;
            let epoch = self.epoch.current();
            for handler in self.handlers.read().iter() {
                handler.on_disconnected(epoch);
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!("Session state: {}", state);
            for handler in self.handlers.read().iter() {
                handler.on_state(state);
            }
        }
    }

    fn require_client(&self) -> Result<Arc<TreeClient>> {
        self.client().ok_or(ClientError::NotConnected)
    }
}

#[async_trait]
impl ElementTree for ConnectionSession {
    async fn resolve(&self, path: &TreePath) -> Result<Element> {
        self.require_client()?.get_element(path).await
    }

    async fn list_children(&self, path: &TreePath) -> Result<Vec<Element>> {
        let client = self.require_client()?;
        client.get_directory(path).await.map(|(_, children)| children)
    }

    async fn subscribe(&self, path: &TreePath, callback: UpdateCallback) -> Result<()> {
        self.require_client()?.subscribe(path, callback).await
    }

    async fn matrix_connect(&self, path: &TreePath, target: u32, sources: &[u32]) -> Result<()> {
        self.require_client()?
            .matrix_connect(path, target, sources)
            .await
    }
}

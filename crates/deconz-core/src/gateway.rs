// ── Gateway abstraction ──
//
// Full lifecycle for one deCONZ gateway: initial discovery, the discovery
// poll, the push socket, and the bridge task that routes push frames into
// the directory and out to subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use deconz_api::{GatewayClient, SocketConfig, SocketEvent, SocketHandle, TlsMode, TransportConfig};

use crate::config::{GatewayConfig, TlsVerification};
use crate::error::CoreError;
use crate::model::{Device, SubscriberId, UniqueId};
use crate::router::{EventRouter, RouteOutcome};
use crate::store::{Catalogue, Directory, Selection, StateListener, SubscriptionRegistry};
use crate::stream::{CatalogueStream, DeviceFilter, DeviceUpdates};

const SOCKET_EVENT_CHANNEL_SIZE: usize = 1024;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Authentication was refused, or the socket crossed its retry
    /// threshold. Reconnects still run.
    Failed,
}

impl ConnectionState {
    /// The state a socket event moves us to, if any.
    fn after(&self, event: &SocketEvent) -> Option<Self> {
        let next = match event {
            SocketEvent::Open => Self::Connected,
            SocketEvent::Connecting { attempt } => match self {
                Self::Disconnected | Self::Connecting => Self::Connecting,
                _ => Self::Reconnecting { attempt: *attempt },
            },
            SocketEvent::MaxRetries { .. } | SocketEvent::Unauthorized => Self::Failed,
            _ => return None,
        };
        (next != *self).then_some(next)
    }
}

// ── Gateway ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<GatewayInner>`. Every `Gateway::new` builds an
/// independent directory, registry and socket; nothing is shared between
/// gateways.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    directory: Arc<Directory>,
    registry: Arc<SubscriptionRegistry>,
    router: EventRouter,
    connection_state: watch::Sender<ConnectionState>,
    /// Socket events re-broadcast for consumers; survives reconnects.
    socket_events: broadcast::Sender<SocketEvent>,
    /// Wakes the poll task for an out-of-band forced discovery.
    refresh: Notify,
    cancel: CancellationToken,
    /// Child token for the current connection. Cancelled on close,
    /// replaced on the next connect.
    cancel_child: Mutex<CancellationToken>,
    socket: Mutex<Option<SocketHandle>>,
    /// Held across `connect` so concurrent calls spawn one set of tasks.
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Set once the "no websocket port" warning was raised.
    push_unavailable: AtomicBool,
    /// Non-fatal problems seen while connecting or running.
    warnings: Mutex<Vec<String>>,
}

impl Gateway {
    /// Create a gateway from configuration. Does NOT connect; call
    /// [`connect()`](Self::connect) to discover devices and start the
    /// background tasks.
    pub fn new(config: GatewayConfig) -> Result<Self, CoreError> {
        let client = GatewayClient::new(
            config.base_url()?,
            config.api_key.clone(),
            &build_transport(&config),
        )?;
        let directory = Arc::new(Directory::new(client));
        let registry = Arc::new(SubscriptionRegistry::new());
        let router = EventRouter::new(Arc::clone(&directory), Arc::clone(&registry));
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (socket_events, _) = broadcast::channel(SOCKET_EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Ok(Self {
            inner: Arc::new(GatewayInner {
                config,
                directory,
                registry,
                router,
                connection_state,
                socket_events,
                refresh: Notify::new(),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                socket: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
                push_unavailable: AtomicBool::new(false),
                warnings: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.inner.directory
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Connect to the gateway.
    ///
    /// Runs the initial discovery, then spawns the discovery poll and (if
    /// enabled) the push socket with its bridge task. A refused API key is
    /// fatal; any other discovery failure is recorded as a warning, the
    /// state stays `Connecting`, and the poll retries on the reconnect
    /// interval. The socket starts after the first successful discovery.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            debug!("already connected");
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);
        self.inner.push_unavailable.store(false, Ordering::Relaxed);

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        let discovered = match self.inner.directory.discover(true).await {
            Ok(catalogue) => {
                info!(devices = catalogue.len(), "initial discovery complete");
                true
            }
            Err(e @ CoreError::AuthenticationFailed { .. }) => {
                self.set_state(ConnectionState::Failed);
                return Err(e);
            }
            Err(e) => {
                let mut message = format!("initial discovery failed: {e}");
                if self.inner.config.websocket_enabled {
                    message.push_str("; push socket starts after the next successful discovery");
                }
                self.warn(message).await;
                false
            }
        };

        let period = self.inner.config.effective_polling_interval();
        handles.push(tokio::spawn(poll_task(
            self.clone(),
            period,
            discovered,
            child.clone(),
        )));

        if discovered {
            handles.extend(self.start_push(&child).await);
        }

        info!(host = %self.inner.config.host, "connected to gateway");
        Ok(())
    }

    /// Bring up push delivery after a successful discovery.
    ///
    /// Spawns the socket and returns its bridge task, unless a socket
    /// already runs, the connection was cancelled, or no WebSocket port is
    /// known. Without a socket the gateway is `Connected` as soon as
    /// discovery works; with one, the bridge reports `Connected` on open.
    async fn start_push(&self, cancel: &CancellationToken) -> Option<JoinHandle<()>> {
        let config = &self.inner.config;
        if !config.websocket_enabled {
            self.promote_to_connected();
            return None;
        }

        let mut slot = self.inner.socket.lock().await;
        if slot.is_some() || cancel.is_cancelled() {
            return None;
        }

        let port = config.ws_port.or_else(|| {
            self.inner
                .directory
                .current()
                .and_then(|catalogue| catalogue.gateway().websocket_port)
        });
        let Some(port) = port else {
            if !self.inner.push_unavailable.swap(true, Ordering::Relaxed) {
                self.warn("gateway reported no websocket port; push updates disabled".into())
                    .await;
            }
            self.promote_to_connected();
            return None;
        };

        let socket_config = SocketConfig {
            secure: config.secure,
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_timeout: config.heartbeat_timeout,
            reconnect_interval: config.reconnect_interval,
            max_retries: config.reconnect_max_retries,
            ..SocketConfig::new(config.host.clone(), port)
        };
        debug!(url = %socket_config.url(), "starting push socket");

        let socket = SocketHandle::spawn(socket_config, cancel.child_token());
        let events = socket.subscribe();
        *slot = Some(socket);
        Some(tokio::spawn(bridge_task(self.clone(), events, cancel.clone())))
    }

    /// Shut everything down.
    ///
    /// Cancels the connection token first, which disarms the heartbeat,
    /// any pending reconnect and the discovery poll together; then closes
    /// the socket and joins every task. Subscriptions are left in place.
    pub async fn close(&self) {
        self.inner.cancel_child.lock().await.cancel();

        if let Some(socket) = self.inner.socket.lock().await.take() {
            socket.close().await;
        }

        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        for result in futures_util::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("gateway closed");
    }

    // ── One-shot convenience ─────────────────────────────────────────

    /// Discover, run `f`, close. No socket and no poll: one request-response
    /// cycle, for command-line use.
    pub async fn oneshot<F, Fut, T>(config: GatewayConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Gateway) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let gateway = Gateway::new(config)?;
        gateway.discover(true).await?;
        let result = f(gateway.clone()).await;
        gateway.close().await;
        result
    }

    // ── Directory operations ─────────────────────────────────────────

    /// Cached catalogue, or a (coalesced) REST fetch if there is none or
    /// `force_refresh` is set.
    pub async fn discover(&self, force_refresh: bool) -> Result<Arc<Catalogue>, CoreError> {
        self.inner.directory.discover(force_refresh).await
    }

    pub fn lookup(&self, id: &UniqueId) -> Option<Arc<Device>> {
        self.inner.directory.lookup(id)
    }

    pub async fn list_for_selection(
        &self,
        filter: &DeviceFilter,
        force_refresh: bool,
    ) -> Result<Selection, CoreError> {
        self.inner
            .directory
            .list_for_selection(filter, force_refresh)
            .await
    }

    /// Devices that show up in a discovery pass after the first.
    pub fn new_devices(&self) -> broadcast::Receiver<Arc<Device>> {
        self.inner.directory.new_devices()
    }

    pub fn catalogue_stream(&self) -> CatalogueStream {
        self.inner.directory.catalogue_stream()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self, subscriber: SubscriberId, target: UniqueId) -> DeviceUpdates {
        self.inner.registry.subscribe(subscriber, target)
    }

    pub fn unsubscribe(&self, subscriber: &SubscriberId) -> bool {
        self.inner.registry.unsubscribe(subscriber)
    }

    /// Register a listener held weakly; drop the `Arc` to stop receiving.
    pub fn on_state_change<L>(&self, target: UniqueId, listener: &Arc<L>) -> SubscriberId
    where
        L: StateListener + 'static,
    {
        self.inner.registry.on_state_change(target, listener)
    }

    /// Every push frame with `t == "event"`, verbatim.
    pub fn raw_events(&self) -> broadcast::Receiver<Arc<Value>> {
        self.inner.router.raw_events()
    }

    /// Socket lifecycle events (open, close, timeouts, retries).
    pub fn socket_events(&self) -> broadcast::Receiver<SocketEvent> {
        self.inner.socket_events.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Drain warnings accumulated since the last call.
    pub async fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.warnings.lock().await)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Write `body` to a device: `state` for lights, `action` for groups,
    /// `config` for sensors. The catalogue is not touched; the gateway
    /// echoes the change on the push feed.
    pub async fn send_command(
        &self,
        id: &UniqueId,
        body: &(impl Serialize + Sync),
    ) -> Result<Vec<Value>, CoreError> {
        let device = self
            .lookup(id)
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: id.to_string(),
            })?;
        let path = device.command_path();
        debug!(unique_id = %id, path = %path, "sending command");
        Ok(self.inner.directory.client().put_resource(&path, body).await?)
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Discovery works and there is no socket to wait for. Only
    /// `Connecting` and `Failed` move; a closed gateway stays closed.
    fn promote_to_connected(&self) {
        self.inner.connection_state.send_if_modified(|current| {
            if !matches!(current, ConnectionState::Connecting | ConnectionState::Failed) {
                return false;
            }
            *current = ConnectionState::Connected;
            true
        });
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    async fn warn(&self, message: String) {
        warn!("{message}");
        self.inner.warnings.lock().await.push(message);
    }
}

fn build_transport(config: &GatewayConfig) -> TransportConfig {
    let tls = match &config.tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    };
    TransportConfig {
        tls,
        timeout: config.timeout,
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Forced discovery every `period`, or sooner when a structural push
/// event asks for it. Until one discovery has succeeded it retries on the
/// reconnect interval instead.
async fn poll_task(
    gateway: Gateway,
    period: Duration,
    discovered: bool,
    cancel: CancellationToken,
) {
    if !discovered && !first_discovery(&gateway, &cancel).await {
        return;
    }

    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        let requested = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => false,
            () = gateway.inner.refresh.notified() => true,
        };
        if requested {
            debug!("device set changed, refreshing");
            interval.reset();
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = gateway.inner.directory.discover(true) => result,
        };
        match result {
            Ok(_) => gateway.attach_push(&cancel).await,
            // Failures are logged by the directory; the next tick retries.
            Err(e) => debug!(error = %e, "periodic discovery failed"),
        }
    }
}

/// Retry discovery until it succeeds, then start push delivery. Returns
/// `false` if the connection was cancelled first.
async fn first_discovery(gateway: &Gateway, cancel: &CancellationToken) -> bool {
    let delay = gateway.inner.config.reconnect_interval;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(delay) => {}
        }
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            result = gateway.inner.directory.discover(true) => result,
        };
        match result {
            Ok(catalogue) => {
                info!(devices = catalogue.len(), "discovery recovered");
                gateway.attach_push(cancel).await;
                return true;
            }
            Err(e @ CoreError::AuthenticationFailed { .. }) => {
                gateway.set_state(ConnectionState::Failed);
                debug!(error = %e, "discovery refused");
            }
            Err(e) => debug!(error = %e, "discovery still failing"),
        }
    }
}

/// Socket events → router → subscribers. Runs the router on this one task
/// so per-device delivery follows transport order.
async fn bridge_task(
    gateway: Gateway,
    mut events: broadcast::Receiver<SocketEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = events.recv() => match result {
                Ok(event) => gateway.handle_socket_event(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "socket bridge lagged; frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

impl Gateway {
    /// [`start_push`](Self::start_push) from a background task.
    async fn attach_push(&self, cancel: &CancellationToken) {
        if let Some(bridge) = self.start_push(cancel).await {
            self.inner.task_handles.lock().await.push(bridge);
        }
    }

    async fn handle_socket_event(&self, event: SocketEvent) {
        let current = self.inner.connection_state.borrow().clone();
        if let Some(next) = current.after(&event) {
            self.set_state(next);
        }

        match &event {
            SocketEvent::Message(frame) => {
                if let RouteOutcome::Structural { event } = self.inner.router.route(frame) {
                    debug!(event = %event, "scheduling discovery");
                    self.inner.refresh.notify_one();
                }
            }
            SocketEvent::Unauthorized => {
                self.warn("push socket refused the API key".into()).await;
            }
            SocketEvent::MaxRetries {
                max_retries,
                attempts,
            } => {
                self.warn(format!(
                    "push socket failed {attempts} attempts (limit {max_retries}); still retrying"
                ))
                .await;
            }
            SocketEvent::MalformedFrame(text) => {
                debug!(len = text.len(), "dropping malformed push frame");
            }
            _ => {}
        }

        let _ = self.inner.socket_events.send(event);
    }
}

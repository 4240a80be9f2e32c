//! Self-healing WebSocket connection to the gateway push feed.
//!
//! [`SocketHandle::spawn`] starts a background task that owns exactly one
//! physical connection at a time. The task pings the gateway through a
//! [`Heartbeat`], drops the transport when a pong is missed, and reconnects
//! after a fixed interval for as long as the handle lives. Every lifecycle
//! transition and every inbound frame is published as a [`SocketEvent`] on
//! a [`tokio::sync::broadcast`] channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use deconz_api::websocket::{SocketConfig, SocketEvent, SocketHandle};
//! use tokio_util::sync::CancellationToken;
//!
//! let handle = SocketHandle::spawn(SocketConfig::new("192.168.1.20", 443), CancellationToken::new());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     if let SocketEvent::Message(frame) = event {
//!         println!("{frame}");
//!     }
//! }
//!
//! handle.close().await;
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::heartbeat::{Heartbeat, HeartbeatAction};

// ── Constants ────────────────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on the close handshake during a deliberate shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Close code reported when the transport died without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
const NORMAL_CLOSURE: u16 = 1000;
const NO_STATUS: u16 = 1005;

const CLOSED_BY_CLIENT: &str = "closed by client";

// ── SocketConfig ─────────────────────────────────────────────────────

/// Connection parameters for the push feed.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub hostname: String,
    pub port: u16,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
    /// Delay between a pong and the next ping. Default: 10s.
    pub heartbeat_interval: Duration,
    /// How long to wait for a pong before dropping the transport. Default: 3s.
    pub heartbeat_timeout: Duration,
    /// Fixed delay before every reconnect. Default: 10s.
    pub reconnect_interval: Duration,
    /// Failed attempts tolerated before a [`SocketEvent::MaxRetries`] is
    /// emitted. An attempt fails unless the gateway answers a ping.
    /// Reconnection continues either way. `None` never signals.
    pub max_retries: Option<u32>,
}

impl SocketConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            secure: false,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(3),
            reconnect_interval: Duration::from_secs(10),
            max_retries: None,
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.hostname, self.port)
    }
}

// ── Events & state ───────────────────────────────────────────────────

/// Everything the socket task reports, in the order it happens.
///
/// For one attempt the sequence is `Connecting`, then either `Open`,
/// zero or more `Message`/`MalformedFrame`, an optional `PongTimeout` or
/// `TransportError`, and `Close`; or a failed handshake (`Unauthorized` or
/// `TransportError`) followed by `Close`. `MaxRetries` may follow the
/// `Close` of any attempt that ended before its first pong.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    Connecting { attempt: u32 },
    Open,
    /// A parsed JSON text frame.
    Message(Arc<Value>),
    /// A text frame that was not valid JSON. The connection stays up.
    MalformedFrame(String),
    TransportError(String),
    /// No pong within the heartbeat timeout; the transport was dropped.
    PongTimeout,
    /// The upgrade was refused with HTTP 401.
    Unauthorized,
    /// The failure streak crossed `max_retries`. Emitted once per streak.
    MaxRetries { max_retries: u32, attempts: u32 },
    Close { code: u16, reason: String },
}

/// Lifecycle of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Open,
    /// Deliberate shutdown in progress.
    Closing,
    /// The connection failed; a reconnect is pending.
    Faulted,
}

// ── RetryState ───────────────────────────────────────────────────────

/// Attempt counter with a "notify but never give up" threshold.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_retries: Option<u32>,
    signalled: bool,
}

impl RetryState {
    pub fn new(max_retries: Option<u32>) -> Self {
        Self {
            attempt: 0,
            max_retries,
            signalled: false,
        }
    }

    /// Count a new attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// A connection answered its first ping; the streak is over.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.signalled = false;
    }

    /// Record that the current attempt ended before a pong was answered.
    ///
    /// Returns the attempt count the first time it exceeds the maximum,
    /// `None` otherwise.
    pub fn after_failure(&mut self) -> Option<u32> {
        let max = self.max_retries?;
        if self.signalled || self.attempt <= max {
            return None;
        }
        self.signalled = true;
        Some(self.attempt)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// ── SocketHandle ─────────────────────────────────────────────────────

/// Handle to the running socket task.
///
/// Dropping the handle does not stop the task; call [`close`](Self::close)
/// (or cancel the token passed to [`spawn`](Self::spawn)).
pub struct SocketHandle {
    events: broadcast::Sender<SocketEvent>,
    /// Receiver created alongside the channel so the first subscriber sees
    /// events emitted before it subscribed.
    initial_rx: Mutex<Option<broadcast::Receiver<SocketEvent>>>,
    state: watch::Receiver<SocketState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SocketHandle {
    /// Spawn the connection task. Returns immediately; the first attempt
    /// runs in the background.
    pub fn spawn(config: SocketConfig, cancel: CancellationToken) -> Self {
        let (events, initial_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state) = watch::channel(SocketState::Disconnected);

        let task = tokio::spawn(socket_loop(
            config,
            events.clone(),
            state_tx,
            cancel.clone(),
        ));

        Self {
            events,
            initial_rx: Mutex::new(Some(initial_rx)),
            state,
            cancel,
            task,
        }
    }

    /// Get a receiver for the event stream.
    ///
    /// The first call returns a receiver that has buffered everything since
    /// spawn; later calls only see events from that point on.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.initial_rx
            .lock()
            .expect("socket receiver lock poisoned")
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    /// Watch channel of lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<SocketState> {
        self.state.clone()
    }

    /// Signal the task to stop without waiting for it.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stop reconnecting, close the transport, and wait for the task.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "socket task ended abnormally");
        }
    }
}

// ── Background loop ──────────────────────────────────────────────────

enum Outcome {
    /// The token fired; no reconnect.
    Cancelled,
    /// The connection ended (or never opened). Reconnect after the interval.
    Ended {
        /// A pong arrived before the end; the failure streak was reset.
        live: bool,
        code: u16,
        reason: String,
    },
}

fn emit(events: &broadcast::Sender<SocketEvent>, event: SocketEvent) {
    // No receivers is fine; nobody is listening right now.
    let _ = events.send(event);
}

async fn socket_loop(
    config: SocketConfig,
    events: broadcast::Sender<SocketEvent>,
    state: watch::Sender<SocketState>,
    cancel: CancellationToken,
) {
    let url = config.url();
    let mut retry = RetryState::new(config.max_retries);

    while !cancel.is_cancelled() {
        let attempt = retry.begin_attempt();
        state.send_replace(SocketState::Connecting);
        emit(&events, SocketEvent::Connecting { attempt });
        info!(url = %url, attempt, "connecting to gateway websocket");

        match run_connection(&config, &url, &events, &state, &cancel, &mut retry).await {
            Outcome::Cancelled => break,
            Outcome::Ended { live, code, reason } => {
                state.send_replace(SocketState::Faulted);
                info!(code, reason = %reason, "gateway websocket closed");
                emit(&events, SocketEvent::Close { code, reason });

                if !live {
                    if let Some(attempts) = retry.after_failure() {
                        let max_retries = config.max_retries.unwrap_or_default();
                        warn!(max_retries, attempts, "websocket retry limit exceeded, still retrying");
                        emit(
                            &events,
                            SocketEvent::MaxRetries {
                                max_retries,
                                attempts,
                            },
                        );
                    }
                }
            }
        }

        debug!(
            delay_ms = u64::try_from(config.reconnect_interval.as_millis()).unwrap_or(u64::MAX),
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(config.reconnect_interval) => {}
        }
    }

    state.send_replace(SocketState::Disconnected);
    debug!("websocket loop exiting");
}

/// One attempt: handshake, then read until the connection ends.
async fn run_connection(
    config: &SocketConfig,
    url: &str,
    events: &broadcast::Sender<SocketEvent>,
    state: &watch::Sender<SocketState>,
    cancel: &CancellationToken,
    retry: &mut RetryState,
) -> Outcome {
    let uri: tungstenite::http::Uri = match url.parse() {
        Ok(uri) => uri,
        Err(e) => return handshake_failed(events, format!("invalid websocket url: {e}")),
    };

    let handshake = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            emit_client_close(events, state);
            return Outcome::Cancelled;
        }
        result = tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri)) => result,
    };

    let ws_stream = match handshake {
        Ok((ws_stream, _response)) => ws_stream,
        Err(tungstenite::Error::Http(response)) if response.status().as_u16() == 401 => {
            warn!("gateway refused websocket upgrade (HTTP 401)");
            emit(events, SocketEvent::Unauthorized);
            return Outcome::Ended {
                live: false,
                code: ABNORMAL_CLOSURE,
                reason: "unauthorized".into(),
            };
        }
        Err(e) => return handshake_failed(events, e.to_string()),
    };

    state.send_replace(SocketState::Open);
    emit(events, SocketEvent::Open);
    info!("gateway websocket open");

    let (mut write, mut read) = ws_stream.split();
    let mut heartbeat = Heartbeat::begin(
        config.heartbeat_interval,
        config.heartbeat_timeout,
        Instant::now(),
    );
    // The streak only ends once the gateway answers a ping.
    let mut live = false;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                state.send_replace(SocketState::Closing);
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: CLOSED_BY_CLIENT.into(),
                };
                if tokio::time::timeout(CLOSE_TIMEOUT, write.send(Message::Close(Some(frame))))
                    .await
                    .is_err()
                {
                    debug!("close handshake timed out");
                }
                emit_client_close(events, state);
                return Outcome::Cancelled;
            }
            () = sleep_until(heartbeat.deadline()) => {
                match heartbeat.on_timer(Instant::now()) {
                    Some(HeartbeatAction::SendPing) => {
                        trace!("ping");
                        if let Err(e) = write.send(Message::Ping(Default::default())).await {
                            return stream_failed(events, live, e.to_string());
                        }
                    }
                    Some(HeartbeatAction::Timeout) => {
                        let timeout_ms =
                            u64::try_from(heartbeat.timeout().as_millis()).unwrap_or(u64::MAX);
                        warn!(timeout_ms, "no pong from gateway, dropping connection");
                        emit(events, SocketEvent::PongTimeout);
                        return Outcome::Ended {
                            live,
                            code: ABNORMAL_CLOSURE,
                            reason: "heartbeat timeout".into(),
                        };
                    }
                    None => {}
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Value>(text.as_str()) {
                        Ok(value) => emit(events, SocketEvent::Message(Arc::new(value))),
                        Err(e) => {
                            debug!(error = %e, "dropping malformed frame");
                            emit(events, SocketEvent::MalformedFrame(e.to_string()));
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    if heartbeat.on_pong(Instant::now()) {
                        trace!("pong");
                        if !live {
                            live = true;
                            retry.reset();
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (NO_STATUS, String::new()),
                        |cf| (u16::from(cf.code), cf.reason.as_str().to_owned()),
                    );
                    return Outcome::Ended { live, code, reason };
                }
                Some(Ok(_)) => {
                    // Ping replies are queued by tungstenite; binary frames
                    // are not part of the gateway protocol.
                }
                Some(Err(e)) => return stream_failed(events, live, e.to_string()),
                None => {
                    return Outcome::Ended {
                        live,
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".into(),
                    };
                }
            },
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn handshake_failed(events: &broadcast::Sender<SocketEvent>, message: String) -> Outcome {
    warn!(error = %message, "websocket connect failed");
    emit(events, SocketEvent::TransportError(message.clone()));
    Outcome::Ended {
        live: false,
        code: ABNORMAL_CLOSURE,
        reason: message,
    }
}

fn stream_failed(events: &broadcast::Sender<SocketEvent>, live: bool, message: String) -> Outcome {
    warn!(error = %message, "websocket stream error");
    emit(events, SocketEvent::TransportError(message.clone()));
    Outcome::Ended {
        live,
        code: ABNORMAL_CLOSURE,
        reason: message,
    }
}

fn emit_client_close(events: &broadcast::Sender<SocketEvent>, state: &watch::Sender<SocketState>) {
    emit(
        events,
        SocketEvent::Close {
            code: NORMAL_CLOSURE,
            reason: CLOSED_BY_CLIENT.into(),
        },
    );
    state.send_replace(SocketState::Disconnected);
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_config() {
        let config = SocketConfig::new("gw.local", 443);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(3));
        assert_eq!(config.reconnect_interval, Duration::from_secs(10));
        assert!(config.max_retries.is_none());
        assert_eq!(config.url(), "ws://gw.local:443");
    }

    #[test]
    fn secure_url_uses_wss() {
        let mut config = SocketConfig::new("10.0.0.2", 8443);
        config.secure = true;
        assert_eq!(config.url(), "wss://10.0.0.2:8443");
    }

    #[test]
    fn max_retries_signals_after_fourth_failure() {
        let mut retry = RetryState::new(Some(3));
        let mut signals = Vec::new();
        for _ in 0..8 {
            retry.begin_attempt();
            if let Some(attempts) = retry.after_failure() {
                signals.push(attempts);
            }
        }
        assert_eq!(signals, vec![4]);
        assert_eq!(retry.attempt(), 8);
    }

    #[test]
    fn reset_rearms_the_signal() {
        let mut retry = RetryState::new(Some(1));
        retry.begin_attempt();
        assert_eq!(retry.after_failure(), None);
        retry.begin_attempt();
        assert_eq!(retry.after_failure(), Some(2));

        retry.reset();
        retry.begin_attempt();
        assert_eq!(retry.after_failure(), None);
        retry.begin_attempt();
        assert_eq!(retry.after_failure(), Some(2));
    }

    #[test]
    fn unlimited_retries_never_signal() {
        let mut retry = RetryState::new(None);
        for _ in 0..100 {
            retry.begin_attempt();
            assert_eq!(retry.after_failure(), None);
        }
    }

    #[test]
    fn zero_max_signals_on_first_failure() {
        let mut retry = RetryState::new(Some(0));
        retry.begin_attempt();
        assert_eq!(retry.after_failure(), Some(1));
    }
}

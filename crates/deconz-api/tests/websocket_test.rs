#![allow(clippy::unwrap_used)]
// Integration tests for the heartbeat socket against local WebSocket servers.

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use deconz_api::{SocketConfig, SocketEvent, SocketHandle, SocketState};

// ── Helpers ─────────────────────────────────────────────────────────

/// Bind a local listener and run `handler` for every accepted connection.
async fn spawn_server<F, Fut>(handler: F) -> u16
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handler(stream));
        }
    });
    port
}

/// Reads every frame; tungstenite answers pings while reading.
async fn pong_server(stream: TcpStream) {
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    while let Some(Ok(_)) = ws.next().await {}
}

/// Completes the handshake, then never reads again.
async fn silent_server(stream: TcpStream) {
    let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
}

fn config(port: u16) -> SocketConfig {
    let mut config = SocketConfig::new("127.0.0.1", port);
    config.heartbeat_interval = Duration::from_millis(30);
    config.heartbeat_timeout = Duration::from_millis(150);
    config.reconnect_interval = Duration::from_secs(5);
    config
}

async fn collect_for(rx: &mut broadcast::Receiver<SocketEvent>, window: Duration) -> Vec<SocketEvent> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(window, async {
        while let Ok(event) = rx.recv().await {
            events.push(event);
        }
    })
    .await;
    events
}

/// Collect events until `done` matches one, failing after `limit`.
async fn collect_until(
    rx: &mut broadcast::Receiver<SocketEvent>,
    limit: Duration,
    done: impl Fn(&SocketEvent) -> bool,
) -> Vec<SocketEvent> {
    let mut events = Vec::new();
    let reached = tokio::time::timeout(limit, async {
        loop {
            let event = rx.recv().await.unwrap();
            let finished = done(&event);
            events.push(event);
            if finished {
                break;
            }
        }
    })
    .await
    .is_ok();
    assert!(reached, "condition not reached, saw: {events:?}");
    events
}

fn count(events: &[SocketEvent], pred: impl Fn(&SocketEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

// ── Heartbeat ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_answered_pings_never_time_out() {
    let port = spawn_server(pong_server).await;
    let handle = SocketHandle::spawn(config(port), CancellationToken::new());
    let mut rx = handle.subscribe();

    let events = collect_for(&mut rx, Duration::from_millis(600)).await;

    assert_eq!(count(&events, |e| matches!(e, SocketEvent::Open)), 1);
    assert_eq!(count(&events, |e| matches!(e, SocketEvent::PongTimeout)), 0);
    assert_eq!(count(&events, |e| matches!(e, SocketEvent::Close { .. })), 0);
    assert_eq!(handle.state(), SocketState::Open);

    handle.close().await;
}

#[tokio::test]
async fn test_missed_pong_times_out_once() {
    let port = spawn_server(silent_server).await;
    let handle = SocketHandle::spawn(config(port), CancellationToken::new());
    let mut rx = handle.subscribe();

    let events = collect_for(&mut rx, Duration::from_millis(800)).await;

    assert_eq!(count(&events, |e| matches!(e, SocketEvent::PongTimeout)), 1);
    let timeout_at = events
        .iter()
        .position(|e| matches!(e, SocketEvent::PongTimeout))
        .unwrap();
    assert!(
        matches!(events.get(timeout_at + 1), Some(SocketEvent::Close { code: 1006, .. })),
        "expected abnormal close after the timeout, saw: {events:?}"
    );
    assert_eq!(handle.state(), SocketState::Faulted);

    handle.close().await;
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test]
async fn test_max_retries_signalled_once_and_retrying_continues() {
    let port = spawn_server(|stream: TcpStream| async move { drop(stream) }).await;
    let mut config = config(port);
    config.reconnect_interval = Duration::from_millis(10);
    config.max_retries = Some(3);

    let handle = SocketHandle::spawn(config, CancellationToken::new());
    let mut rx = handle.subscribe();

    let events = collect_until(&mut rx, Duration::from_secs(5), |e| {
        matches!(e, SocketEvent::Connecting { attempt: 7 })
    })
    .await;

    assert_eq!(count(&events, |e| matches!(e, SocketEvent::Open)), 0);
    assert_eq!(count(&events, |e| matches!(e, SocketEvent::MaxRetries { .. })), 1);

    let signal_at = events
        .iter()
        .position(|e| matches!(e, SocketEvent::MaxRetries { max_retries: 3, attempts: 4 }))
        .unwrap();
    let closes_before = count(&events[..signal_at], |e| matches!(e, SocketEvent::Close { .. }));
    assert_eq!(closes_before, 4);
    assert!(matches!(
        events.get(signal_at + 1),
        Some(SocketEvent::Connecting { attempt: 5 })
    ));

    handle.close().await;
}

#[tokio::test]
async fn test_unanswered_connections_count_toward_max_retries() {
    let port = spawn_server(silent_server).await;
    let mut config = config(port);
    config.heartbeat_timeout = Duration::from_millis(80);
    config.reconnect_interval = Duration::from_millis(10);
    config.max_retries = Some(3);

    let handle = SocketHandle::spawn(config, CancellationToken::new());
    let mut rx = handle.subscribe();

    let events = collect_until(&mut rx, Duration::from_secs(5), |e| {
        matches!(e, SocketEvent::Connecting { attempt: 6 })
    })
    .await;

    assert_eq!(count(&events, |e| matches!(e, SocketEvent::Open)), 5);
    assert_eq!(count(&events, |e| matches!(e, SocketEvent::PongTimeout)), 5);
    assert_eq!(count(&events, |e| matches!(e, SocketEvent::MaxRetries { .. })), 1);
    let signal_at = events
        .iter()
        .position(|e| matches!(e, SocketEvent::MaxRetries { max_retries: 3, attempts: 4 }))
        .unwrap();
    assert_eq!(
        count(&events[..signal_at], |e| matches!(e, SocketEvent::PongTimeout)),
        4
    );

    handle.close().await;
}

#[tokio::test]
async fn test_answered_connections_reset_the_streak() {
    let port = spawn_server(|stream: TcpStream| async move {
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = tokio::time::timeout(Duration::from_millis(100), async {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;
    })
    .await;
    let mut config = config(port);
    config.reconnect_interval = Duration::from_millis(10);
    config.max_retries = Some(1);

    let handle = SocketHandle::spawn(config, CancellationToken::new());
    let mut rx = handle.subscribe();

    let mut events = Vec::new();
    for _ in 0..4 {
        events.extend(
            collect_until(&mut rx, Duration::from_secs(2), |e| {
                matches!(e, SocketEvent::Close { .. })
            })
            .await,
        );
    }

    assert_eq!(count(&events, |e| matches!(e, SocketEvent::MaxRetries { .. })), 0);
    assert!(
        events
            .iter()
            .all(|e| !matches!(e, SocketEvent::Connecting { attempt } if *attempt > 1)),
        "attempt counter should restart after each answered ping, saw: {events:?}"
    );

    handle.close().await;
}

#[tokio::test]
async fn test_upgrade_401_is_unauthorized() {
    let port = spawn_server(|mut stream: TcpStream| async move {
        let mut buf = [0_u8; 2048];
        let _ = stream.read(&mut buf).await;
        let _ = stream
            .write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await;
        let _ = stream.shutdown().await;
    })
    .await;

    let handle = SocketHandle::spawn(config(port), CancellationToken::new());
    let mut rx = handle.subscribe();

    let events = collect_until(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, SocketEvent::Close { .. })
    })
    .await;

    assert_eq!(count(&events, |e| matches!(e, SocketEvent::Unauthorized)), 1);
    assert_eq!(count(&events, |e| matches!(e, SocketEvent::TransportError(_))), 0);

    handle.close().await;
}

#[tokio::test]
async fn test_close_stops_reconnecting() {
    let port = spawn_server(pong_server).await;
    let mut config = config(port);
    config.reconnect_interval = Duration::from_millis(10);

    let handle = SocketHandle::spawn(config, CancellationToken::new());
    let mut rx = handle.subscribe();
    let state = handle.state_changes();

    collect_until(&mut rx, Duration::from_secs(2), |e| matches!(e, SocketEvent::Open)).await;
    handle.close().await;

    let mut after = Vec::new();
    while let Ok(event) = rx.recv().await {
        after.push(event);
    }

    assert!(
        matches!(after.last(), Some(SocketEvent::Close { code: 1000, .. })),
        "expected a client close, saw: {after:?}"
    );
    assert_eq!(count(&after, |e| matches!(e, SocketEvent::Connecting { .. })), 0);
    assert_eq!(*state.borrow(), SocketState::Disconnected);
}

#[tokio::test]
async fn test_external_cancel_stops_task() {
    let port = spawn_server(pong_server).await;
    let cancel = CancellationToken::new();
    let handle = SocketHandle::spawn(config(port), cancel.clone());
    let mut rx = handle.subscribe();

    collect_until(&mut rx, Duration::from_secs(2), |e| matches!(e, SocketEvent::Open)).await;
    cancel.cancel();

    collect_until(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, SocketEvent::Close { code: 1000, .. })
    })
    .await;
    handle.close().await;
}

// ── Frames ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let port = spawn_server(|stream: TcpStream| async move {
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text("{not json")).await.unwrap();
        ws.send(Message::text(r#"{"t":"event","e":"changed","r":"lights","id":"1","state":{"on":true}}"#))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let handle = SocketHandle::spawn(config(port), CancellationToken::new());
    let mut rx = handle.subscribe();

    let events = collect_until(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, SocketEvent::Message(_))
    })
    .await;

    assert_eq!(count(&events, |e| matches!(e, SocketEvent::MalformedFrame(_))), 1);
    assert_eq!(count(&events, |e| matches!(e, SocketEvent::Close { .. })), 0);
    match events.last() {
        Some(SocketEvent::Message(frame)) => assert_eq!(frame["state"]["on"], true),
        other => panic!("expected a message, got: {other:?}"),
    }

    handle.close().await;
}

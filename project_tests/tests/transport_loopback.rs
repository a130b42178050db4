//! Snapshots over real sockets: a minimal STOMP broker, a Socket.IO server
//! and a raw WebSocket source, each bound to a loopback port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use lib_datafeed::configs::{ProviderConfig, TransportConfig};
use lib_datafeed::core::ProviderMode;
use lib_datafeed::providers::build_provider;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

type ServerSocket = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Accepts WebSocket clients and hands each one to `session`.
async fn serve<F, Fut>(session: F) -> anyhow::Result<SocketAddr>
where
    F: Fn(ServerSocket) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(socket) = accept_async(stream).await {
                tokio::spawn(session(socket));
            }
        }
    });
    Ok(addr)
}

async fn next_text(socket: &mut ServerSocket) -> Option<String> {
    while let Some(Ok(message)) = socket.next().await {
        if let Message::Text(text) = message {
            return Some(text.as_str().to_string());
        }
    }
    None
}

async fn send_text(socket: &mut ServerSocket, text: String) {
    let _ = socket.send(Message::Text(text.into())).await;
}

fn header<'a>(frame: &'a str, name: &str) -> Option<&'a str> {
    frame
        .lines()
        .skip(1)
        .take_while(|line| !line.is_empty())
        .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
}

/// Answers CONNECT, waits for the snapshot request on `/app/snapshot`, then
/// pushes two row frames (one repeating a key) and the end token.
async fn stomp_broker(mut socket: ServerSocket) {
    let mut subscription = String::new();
    while let Some(frame) = next_text(&mut socket).await {
        let command = frame.lines().next().unwrap_or_default().to_string();
        match command.as_str() {
            "CONNECT" | "STOMP" => {
                send_text(&mut socket, "CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0".into()).await;
            }
            "SUBSCRIBE" => subscription = header(&frame, "id").unwrap_or_default().to_string(),
            "SEND" if header(&frame, "destination") == Some("/app/snapshot") => {
                let bodies = [
                    json!([{"id": "A", "px": 1.5}, {"id": "B", "px": 2.0}]).to_string(),
                    json!({"data": [{"id": "A", "px": 1.75}]}).to_string(),
                    json!({"snapshotToken": "Done"}).to_string(),
                ];
                for (n, body) in bodies.iter().enumerate() {
                    let frame = format!(
                        "MESSAGE\ndestination:/topic/prices\nsubscription:{subscription}\nmessage-id:{n}\ncontent-length:{}\n\n{body}\0",
                        body.len()
                    );
                    send_text(&mut socket, frame).await;
                }
            }
            "DISCONNECT" => break,
            _ => {}
        }
    }
}

#[tokio::test]
async fn stomp_snapshot_against_a_loopback_broker() {
    let addr = serve(stomp_broker).await.unwrap();
    let config = ProviderConfig::Stomp(TransportConfig {
        request_topic: Some("/app/snapshot".into()),
        snapshot_end_token: "Done".into(),
        key_column: Some("id".into()),
        snapshot_timeout_ms: 5_000,
        heartbeat_incoming_ms: 0,
        heartbeat_outgoing_ms: 0,
        ..TransportConfig::new(format!("ws://{addr}/ws"), "/topic/prices")
    });
    let mut provider = build_provider(&config).unwrap();

    assert!(provider.check_connection().await.unwrap());
    let outcome = provider.fetch_snapshot(100, None).await.unwrap();

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.rows(), &[json!({"id": "A", "px": 1.75}), json!({"id": "B", "px": 2.0})]);
    let stats = provider.statistics();
    assert_eq!(stats.snapshot_rows_received, 3);
    assert_eq!(stats.connection_count, 2);
}

/// Engine.IO handshake, namespace connect, then rows on `prices` once the
/// client emits `snapshot`.
async fn socketio_server(mut socket: ServerSocket) {
    send_text(
        &mut socket,
        r#"0{"sid":"e1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#.into(),
    )
    .await;
    while let Some(packet) = next_text(&mut socket).await {
        if packet == "40" {
            send_text(&mut socket, r#"40{"sid":"s1"}"#.into()).await;
        } else if packet.starts_with(r#"42["snapshot""#) {
            send_text(&mut socket, r#"42["other",[{"ignored":true}]]"#.into()).await;
            send_text(&mut socket, r#"42["prices",[{"sym":"X"},{"sym":"Y"}]]"#.into()).await;
            send_text(&mut socket, r#"42["prices",{"status":"Success"}]"#.into()).await;
        } else if packet == "41" {
            break;
        }
    }
}

#[tokio::test]
async fn socketio_snapshot_forwards_subscribed_events_only() {
    let addr = serve(socketio_server).await.unwrap();
    let config = ProviderConfig::SocketIo(TransportConfig {
        request_topic: Some("snapshot".into()),
        snapshot_timeout_ms: 5_000,
        ..TransportConfig::new(format!("http://{addr}"), "prices")
    });
    let mut provider = build_provider(&config).unwrap();

    let outcome = provider.fetch_snapshot(0, None).await.unwrap();

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.rows(), &[json!({"sym": "X"}), json!({"sym": "Y"})]);
}

async fn raw_source(mut socket: ServerSocket) {
    send_text(&mut socket, json!([{"n": 1}]).to_string()).await;
    send_text(&mut socket, json!({"n": 2}).to_string()).await;
    let _ = socket.close(None).await;
}

#[tokio::test]
async fn raw_websocket_close_resolves_with_partial_rows() {
    let addr = serve(raw_source).await.unwrap();
    let config = ProviderConfig::WebSocket(TransportConfig {
        snapshot_timeout_ms: 5_000,
        ..TransportConfig::new(format!("ws://{addr}"), "")
    });
    let mut provider = build_provider(&config).unwrap();

    let outcome = provider.fetch_snapshot(0, None).await.unwrap();

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.rows(), &[json!({"n": 1}), json!({"n": 2})]);
}

/// Drops the first connection right after its SUBSCRIBE; on later
/// connections answers each SUBSCRIBE with one row.
async fn flaky_broker(mut socket: ServerSocket, attempt: usize, subscribes: Arc<AtomicUsize>) {
    while let Some(frame) = next_text(&mut socket).await {
        let command = frame.lines().next().unwrap_or_default().to_string();
        match command.as_str() {
            "CONNECT" | "STOMP" => {
                send_text(&mut socket, "CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0".into()).await;
            }
            "SUBSCRIBE" => {
                subscribes.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    return;
                }
                let subscription = header(&frame, "id").unwrap_or_default();
                let body = json!([{"id": "A", "attempt": attempt}]).to_string();
                let frame = format!(
                    "MESSAGE\ndestination:/topic/prices\nsubscription:{subscription}\nmessage-id:{attempt}\ncontent-length:{}\n\n{body}\0",
                    body.len()
                );
                send_text(&mut socket, frame).await;
            }
            "DISCONNECT" => break,
            _ => {}
        }
    }
}

#[tokio::test]
async fn realtime_feed_resubscribes_after_a_dropped_connection() {
    let connections = Arc::new(AtomicUsize::new(0));
    let subscribes = Arc::new(AtomicUsize::new(0));
    let (accepted, subscribed) = (connections.clone(), subscribes.clone());
    let addr = serve(move |socket| {
        let attempt = accepted.fetch_add(1, Ordering::SeqCst);
        flaky_broker(socket, attempt, subscribed.clone())
    })
    .await
    .unwrap();
    let config = ProviderConfig::Stomp(TransportConfig {
        heartbeat_incoming_ms: 0,
        heartbeat_outgoing_ms: 0,
        reconnect_delay_ms: Some(50),
        ..TransportConfig::new(format!("ws://{addr}/ws"), "/topic/prices")
    });
    let mut provider = build_provider(&config).unwrap();

    let mut updates = provider.start_realtime().await.unwrap();
    let batch = tokio::time::timeout(std::time::Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(batch.rows, vec![json!({"id": "A", "attempt": 1})]);
    assert_eq!(connections.load(Ordering::SeqCst), 2);
    assert_eq!(subscribes.load(Ordering::SeqCst), 2);
    let stats = provider.statistics();
    assert_eq!(stats.connection_count, 2);
    assert_eq!(stats.disconnection_count, 1);
    assert_eq!(stats.mode, ProviderMode::Realtime);

    provider.disconnect().await;
    assert!(updates.recv().await.is_none());
}

/// Joins the `/quotes` namespace and pushes a row the moment the namespace
/// is confirmed, before any request from the client.
async fn eager_socketio_server(mut socket: ServerSocket) {
    send_text(
        &mut socket,
        r#"0{"sid":"e2","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#.into(),
    )
    .await;
    while let Some(packet) = next_text(&mut socket).await {
        if packet == "40/quotes," {
            send_text(&mut socket, r#"40/quotes,{"sid":"q1"}"#.into()).await;
            send_text(&mut socket, r#"42/quotes,["prices",[{"sym":"Z"}]]"#.into()).await;
        } else if packet.starts_with("41") {
            break;
        }
    }
}

#[tokio::test]
async fn socketio_realtime_keeps_events_pushed_on_connect() {
    let addr = serve(eager_socketio_server).await.unwrap();
    let config = ProviderConfig::SocketIo(TransportConfig {
        namespace: Some("/quotes".into()),
        ..TransportConfig::new(format!("http://{addr}"), "prices")
    });
    let mut provider = build_provider(&config).unwrap();

    let mut updates = provider.start_realtime().await.unwrap();
    let batch = tokio::time::timeout(std::time::Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(batch.rows, vec![json!({"sym": "Z"})]);
    provider.disconnect().await;
}

#[tokio::test]
async fn refused_connection_fails_the_snapshot() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let config = ProviderConfig::Stomp(TransportConfig::new(format!("ws://{addr}/ws"), "/topic/x"));
    let mut provider = build_provider(&config).unwrap();

    assert!(!provider.check_connection().await.unwrap());
    let outcome = provider.fetch_snapshot(10, None).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().starts_with("WebSocket connection failed"));
}

#[tokio::test]
async fn malformed_url_is_an_activation_error() {
    let config = ProviderConfig::WebSocket(TransportConfig::new("not a url", "/topic/x"));
    let mut provider = build_provider(&config).unwrap();
    assert!(provider.fetch_snapshot(10, None).await.is_err());
}

//! End-to-end snapshot and real-time scenarios for the streaming provider,
//! driven by a scripted transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_datafeed::configs::{MockConfig, ProviderType, TransportConfig};
use lib_datafeed::core::{ConnectionState, ProviderMode};
use lib_datafeed::providers::{DataProvider, MockProvider, StreamingProvider};
use lib_datafeed::transport::TransportEvent;
use project_tests::{ScriptedConnector, rows_message, text_message};
use serde_json::{Value, json};

fn config() -> TransportConfig {
    TransportConfig {
        request_topic: Some("/app/rows/snapshot".into()),
        ..TransportConfig::new("ws://broker.test/ws", "/topic/rows")
    }
}

fn provider(connector: ScriptedConnector, config: TransportConfig) -> StreamingProvider<ScriptedConnector> {
    StreamingProvider::new(ProviderType::Stomp, connector, config)
}

#[tokio::test]
async fn end_token_completes_the_snapshot() {
    let connector = ScriptedConnector::new(vec![
        TransportEvent::Connected,
        rows_message(&[json!({"a": 1}), json!({"a": 2})]),
        text_message(r#"{"rows":[{"a":3}]}"#),
        text_message(r#"{"snapshotToken":"Success"}"#),
        rows_message(&[json!({"a": 4})]),
    ])
    .held_open();
    let calls = connector.calls();
    let mut provider = provider(connector, config());

    let outcome = provider.fetch_snapshot(100, None).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.rows(), &[json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]);
    let stats = provider.statistics();
    assert_eq!(stats.snapshot_rows_received, 3);
    assert_eq!(stats.connection_count, 1);
    assert_eq!(stats.disconnection_count, 1);
    assert_eq!(stats.state, ConnectionState::Idle);
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "activate".to_string(),
            "subscribe:/topic/rows".into(),
            "publish:/app/rows/snapshot:START".into(),
            "unsubscribe:/topic/rows".into(),
            "deactivate".into(),
        ]
    );
}

#[tokio::test]
async fn row_cap_truncates_an_oversized_batch() {
    let rows: Vec<Value> = (0..5).map(|i| json!({"i": i})).collect();
    let connector = ScriptedConnector::new(vec![TransportEvent::Connected, rows_message(&rows)]).held_open();
    let mut provider = provider(connector, config());

    let outcome = provider.fetch_snapshot(2, None).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.rows(), &rows[..2]);
    assert_eq!(provider.statistics().snapshot_rows_received, 5);
}

#[tokio::test]
async fn key_column_keeps_the_latest_row_in_place() {
    let connector = ScriptedConnector::new(vec![
        TransportEvent::Connected,
        rows_message(&[json!({"id": 1, "v": "a"}), json!({"id": 2, "v": "b"})]),
        rows_message(&[json!({"id": 1, "v": "c"})]),
        text_message(r#"{"status":"Success"}"#),
    ]);
    let mut provider = provider(
        connector,
        TransportConfig {
            key_column: Some("id".into()),
            ..config()
        },
    );
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();

    let outcome = provider
        .fetch_snapshot(
            0,
            Some(Box::new(move |rows: &[Value], total: usize| {
                sink.lock().unwrap().push((rows.len(), total));
            })),
        )
        .await
        .unwrap();

    assert_eq!(outcome.rows(), &[json!({"id": 1, "v": "c"}), json!({"id": 2, "v": "b"})]);
    assert_eq!(*progress.lock().unwrap(), vec![(2, 2), (1, 2)]);
}

#[tokio::test]
async fn connection_failure_reports_the_socket_error() {
    let connector = ScriptedConnector::new(vec![TransportEvent::SocketError(
        "WebSocket connection failed: Connection refused".into(),
    )]);
    let mut provider = provider(connector, config());

    let outcome = provider.fetch_snapshot(10, None).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("WebSocket connection failed: Connection refused"));
    assert!(outcome.data.is_none());
    assert_eq!(provider.statistics().state, ConnectionState::Error);
}

#[tokio::test]
async fn socket_drop_after_rows_keeps_partial_rows() {
    let connector = ScriptedConnector::new(vec![
        TransportEvent::Connected,
        rows_message(&[json!({"a": 1})]),
        TransportEvent::SocketError("Connection reset".into()),
        TransportEvent::Disconnected,
    ]);
    let mut provider = provider(connector, config());

    let outcome = provider.fetch_snapshot(10, None).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_with_rows_is_a_partial_success() {
    let connector =
        ScriptedConnector::new(vec![TransportEvent::Connected, rows_message(&[json!({"a": 1})])]).held_open();
    let mut provider = provider(
        connector,
        TransportConfig {
            snapshot_timeout_ms: 5_000,
            ..config()
        },
    );

    let outcome = provider.fetch_snapshot(10, None).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.rows(), &[json!({"a": 1})]);
}

#[tokio::test(start_paused = true)]
async fn timeout_without_rows_fails() {
    let connector = ScriptedConnector::new(vec![TransportEvent::Connected]).held_open();
    let mut provider = provider(connector, config());

    let outcome = provider.fetch_snapshot(10, None).await.unwrap();

    assert_eq!(outcome.error.as_deref(), Some("Snapshot timeout - no data received"));
}

#[tokio::test(start_paused = true)]
async fn disconnect_handle_aborts_a_pending_snapshot() {
    let connector = ScriptedConnector::new(vec![TransportEvent::Connected]).held_open();
    let calls = connector.calls();
    let mut provider = provider(connector, config());
    let handle = provider.disconnect_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.disconnect();
    });
    let outcome = provider.fetch_snapshot(10, None).await.unwrap();

    assert_eq!(outcome.error.as_deref(), Some("No data received"));
    assert_eq!(calls.lock().unwrap().last().map(String::as_str), Some("deactivate"));
}

#[tokio::test]
async fn realtime_forwards_rows_and_ignores_completion_tokens() {
    let connector = ScriptedConnector::new(vec![
        TransportEvent::Connected,
        rows_message(&[json!({"a": 1}), json!({"a": 2})]),
        text_message(r#"{"snapshotToken":"Success"}"#),
        text_message("not json"),
        rows_message(&[json!({"a": 3})]),
    ])
    .held_open();
    let mut provider = provider(connector, config());

    let mut updates = provider.start_realtime().await.unwrap();
    let first = updates.recv().await.unwrap();
    let second = updates.recv().await.unwrap();

    assert_eq!(first.rows.len(), 2);
    assert_eq!(second.rows, vec![json!({"a": 3})]);
    let stats = provider.statistics();
    assert_eq!(stats.update_rows_received, 3);
    assert_eq!(stats.mode, ProviderMode::Realtime);

    provider.disconnect().await;
    assert!(updates.recv().await.is_none());
    assert_eq!(provider.statistics().mode, ProviderMode::Idle);
}

#[tokio::test]
async fn check_connection_uses_a_throwaway_client() {
    let connector = ScriptedConnector::new(vec![TransportEvent::Connected]).held_open();
    let calls = connector.calls();
    let mut provider = provider(connector, config());

    assert!(provider.check_connection().await.unwrap());
    assert_eq!(*calls.lock().unwrap(), vec!["activate".to_string(), "deactivate".into()]);
    assert_eq!(provider.statistics().connection_count, 1);
    assert!(!provider.statistics().is_connected);
}

#[tokio::test(start_paused = true)]
async fn check_connection_times_out_without_a_handshake() {
    let connector = ScriptedConnector::new(vec![]).held_open();
    let calls = connector.calls();
    let mut provider = provider(connector, config());

    assert!(!provider.check_connection().await.unwrap());
    assert_eq!(*calls.lock().unwrap(), vec!["activate".to_string(), "deactivate".into()]);
    assert_eq!(provider.statistics().connection_count, 0);
}

#[tokio::test]
async fn check_connection_is_false_on_a_socket_error() {
    let connector =
        ScriptedConnector::new(vec![TransportEvent::SocketError("WebSocket connection failed: refused".into())])
            .held_open();
    let calls = connector.calls();
    let mut provider = provider(connector, config());

    assert!(!provider.check_connection().await.unwrap());
    assert_eq!(*calls.lock().unwrap(), vec!["activate".to_string(), "deactivate".into()]);
    assert_eq!(provider.statistics().connection_count, 0);
}

#[tokio::test]
async fn snapshot_beside_a_live_stream_keeps_it_running() {
    let connector = ScriptedConnector::new(vec![TransportEvent::Connected, rows_message(&[json!({"a": 1})])]).held_open();
    let mut provider = provider(connector, config());
    let mut updates = provider.start_realtime().await.unwrap();
    assert_eq!(updates.recv().await.unwrap().rows, vec![json!({"a": 1})]);

    let outcome = provider.fetch_snapshot(1, None).await.unwrap();
    assert!(outcome.success);

    let stats = provider.statistics();
    assert_eq!(stats.mode, ProviderMode::Realtime);
    assert!(stats.is_connected);
    assert_eq!(stats.connection_count, 1);
    assert_eq!(stats.disconnection_count, 0);

    provider.disconnect_handle().disconnect();
    while updates.recv().await.is_some() {}
}

#[tokio::test(start_paused = true)]
async fn mock_snapshot_beside_live_updates_keeps_them_running() {
    let mut provider = MockProvider::new(MockConfig {
        seed: 11,
        row_count: 20,
        update_interval_ms: 100,
        update_batch_size: 2,
        ..MockConfig::default()
    });
    let mut updates = provider.start_realtime().await.unwrap();
    assert_eq!(updates.recv().await.unwrap().rows.len(), 2);

    let outcome = provider.fetch_snapshot(5, None).await.unwrap();
    assert_eq!(outcome.rows().len(), 5);

    let stats = provider.statistics();
    assert_eq!(stats.mode, ProviderMode::Realtime);
    assert!(stats.is_connected);
    assert_eq!(stats.disconnection_count, 0);
    assert_eq!(updates.recv().await.unwrap().rows.len(), 2);

    provider.disconnect_handle().disconnect();
    while updates.recv().await.is_some() {}
    assert!(!provider.statistics().is_connected);
}

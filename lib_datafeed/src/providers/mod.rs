//! # Providers Module
//!
//! The capability set every data source exposes, and its implementations.
//! Downstream code (grid binding, schema inference, connection-health
//! display) is written once against [`DataProvider`] and never specialized
//! per source.
//!
//! ## Contained Modules:
//!
//! - **`streaming`**: the STOMP / raw WebSocket / Socket.IO state machine,
//!   generic over a `TransportConnector`.
//! - **`rest`**: a poller over the retrying HTTP client; a snapshot is the
//!   first successful page.
//! - **`mock`**: a seeded row generator for demos and tests.
//! - **`app_data`**: static rows supplied by the application, plus rows it
//!   pushes while live.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::configs::{ProviderConfig, ProviderType, TransportConfig};
use crate::core::{BatchCallback, ConnectionOutcome, ConnectionState, Statistics, StatisticsTracker};
use crate::errors::Result;
use crate::schema::{FieldMap, infer_fields};
use crate::transport::stomp::StompOptions;
use crate::transport::{SocketIoConnector, StompConnector, WebSocketConnector};

/// Application-fed static rows.
pub mod app_data;
/// Seeded row generator.
pub mod mock;
/// HTTP poller.
pub mod rest;
/// Pub/sub transport state machine.
pub mod streaming;

pub use app_data::{AppDataFeeder, AppDataProvider};
pub use mock::MockProvider;
pub use rest::RestProvider;
pub use streaming::StreamingProvider;

/// Capacity of the real-time update channel.
pub const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Rows of one real-time message.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBatch {
    pub rows: Vec<Value>,
    /// Raw size of the message the rows came from.
    pub bytes: usize,
}

/// Receiving end of a real-time feed. Ends when the feed stops.
pub type UpdateStream = mpsc::Receiver<UpdateBatch>;

/// The operations shared by every data source.
#[async_trait]
pub trait DataProvider: Send {
    fn provider_type(&self) -> ProviderType;

    /// Opens a throwaway connection and reports whether the source answered
    /// within 10 seconds. Connectivity problems are `Ok(false)`.
    ///
    /// # Errors
    /// Only when the connection cannot even be attempted (activation).
    async fn check_connection(&mut self) -> Result<bool>;

    /// Acquires the initial snapshot, capped at `max_rows` (zero: no cap).
    ///
    /// Exactly one termination path resolves the outcome; failures after
    /// rows have arrived still succeed with the rows received so far.
    ///
    /// # Errors
    /// Only when the connection cannot even be attempted (activation).
    async fn fetch_snapshot(
        &mut self,
        max_rows: usize,
        on_batch: Option<BatchCallback>,
    ) -> Result<ConnectionOutcome>;

    /// Starts continuous delivery and returns the update stream.
    async fn start_realtime(&mut self) -> Result<UpdateStream>;

    /// Tears down any live connection and resets the mode to idle. Idempotent.
    async fn disconnect(&mut self);

    fn statistics(&self) -> Statistics;

    fn watch_statistics(&self) -> watch::Receiver<Statistics>;

    /// A handle that can abort this provider's in-flight operation from
    /// another task.
    fn disconnect_handle(&self) -> DisconnectHandle;
}

/// Cancels every snapshot and feed the owning provider has in flight.
///
/// Each operation runs under its own child token, so arming a snapshot never
/// replaces the token of a live feed. An aborted snapshot resolves like a
/// dropped connection: partial rows if any arrived, `"No data received"`
/// otherwise.
#[derive(Debug, Clone, Default)]
pub struct DisconnectHandle {
    root: Arc<Mutex<CancellationToken>>,
}

impl DisconnectHandle {
    pub fn disconnect(&self) {
        let mut root = self.lock();
        root.cancel();
        *root = CancellationToken::new();
    }

    /// A fresh token for one new operation.
    pub(crate) fn arm(&self) -> CancellationToken {
        self.lock().child_token()
    }

    fn lock(&self) -> MutexGuard<'_, CancellationToken> {
        self.root.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A spawned real-time task and its stop switch.
pub(crate) struct FeedTask {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl FeedTask {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { token, task }
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }

    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Real-time task ended abnormally");
        }
    }
}

/// Connection bookkeeping around one snapshot.
///
/// A snapshot taken while a real-time feed is live rides alongside it: the
/// feed keeps owning the state, `is_connected` and the connection counters.
pub(crate) struct SnapshotLedger {
    stats: Arc<StatisticsTracker>,
    beside_feed: bool,
}

impl SnapshotLedger {
    pub(crate) fn begin(stats: Arc<StatisticsTracker>, feed_live: bool) -> Self {
        if !feed_live {
            stats.set_state(ConnectionState::Connecting);
        }
        Self {
            stats,
            beside_feed: feed_live,
        }
    }

    pub(crate) fn connected(&self) {
        if !self.beside_feed {
            self.stats.record_connected();
            self.stats.set_state(ConnectionState::Snapshot);
        }
    }

    /// The transport never started.
    pub(crate) fn aborted(&self) {
        if !self.beside_feed {
            self.stats.set_state(ConnectionState::Error);
        }
    }

    pub(crate) fn finish(&self, success: bool) {
        if self.beside_feed {
            self.stats.set_state(ConnectionState::Realtime);
            return;
        }
        self.stats.record_disconnected();
        self.stats.set_state(if success {
            ConnectionState::Idle
        } else {
            ConnectionState::Error
        });
    }
}

/// Builds the provider a config selects.
///
/// # Errors
/// `ProviderError::Activation` when a REST base URL is unusable.
pub fn build_provider(config: &ProviderConfig) -> Result<Box<dyn DataProvider>> {
    let provider: Box<dyn DataProvider> = match config {
        ProviderConfig::Stomp(transport) => Box::new(StreamingProvider::new(
            ProviderType::Stomp,
            StompConnector::new(transport.websocket_url.clone(), stomp_options(transport)),
            transport.clone(),
        )),
        ProviderConfig::WebSocket(transport) => Box::new(StreamingProvider::new(
            ProviderType::WebSocket,
            WebSocketConnector::new(transport.websocket_url.clone()),
            transport.clone(),
        )),
        ProviderConfig::SocketIo(transport) => Box::new(StreamingProvider::new(
            ProviderType::SocketIo,
            SocketIoConnector::new(transport.websocket_url.clone())
                .with_namespace(transport.namespace.as_deref().unwrap_or("/")),
            transport.clone(),
        )),
        ProviderConfig::Rest(rest) => Box::new(RestProvider::new(rest.clone())?),
        ProviderConfig::Mock(mock) => Box::new(MockProvider::new(mock.clone())),
        ProviderConfig::AppData(app) => Box::new(AppDataProvider::new(app.clone())),
    };
    Ok(provider)
}

pub fn stomp_options(config: &TransportConfig) -> StompOptions {
    StompOptions {
        host: None,
        heartbeat_outgoing: std::time::Duration::from_millis(config.heartbeat_outgoing_ms),
        heartbeat_incoming: std::time::Duration::from_millis(config.heartbeat_incoming_ms),
    }
}

/// Fetches a snapshot and infers the schema of the rows it returned.
pub async fn load_snapshot_with_schema(
    provider: &mut dyn DataProvider,
    max_rows: usize,
) -> Result<(ConnectionOutcome, FieldMap)> {
    let outcome = provider.fetch_snapshot(max_rows, None).await?;
    let fields = infer_fields(outcome.rows());
    Ok((outcome, fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::MockConfig;

    #[tokio::test]
    async fn disconnect_handle_cancels_every_armed_operation() {
        let handle = DisconnectHandle::default();
        handle.disconnect();
        let feed = handle.arm();
        let snapshot = handle.arm();
        assert!(!feed.is_cancelled());
        snapshot.cancel();
        assert!(!feed.is_cancelled());

        handle.clone().disconnect();
        assert!(feed.is_cancelled());
        assert!(!handle.arm().is_cancelled());
    }

    #[test]
    fn snapshot_beside_a_live_feed_keeps_feed_state() {
        let stats = Arc::new(StatisticsTracker::new());
        stats.record_connected();
        stats.set_state(ConnectionState::Realtime);

        let ledger = SnapshotLedger::begin(stats.clone(), true);
        ledger.connected();
        ledger.finish(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Realtime);
        assert!(snapshot.is_connected);
        assert_eq!(snapshot.connection_count, 1);
        assert_eq!(snapshot.disconnection_count, 0);
    }

    #[tokio::test]
    async fn builds_each_variant() {
        let stomp = ProviderConfig::Stomp(TransportConfig::new("ws://localhost:1/ws", "/topic/x"));
        assert_eq!(build_provider(&stomp).unwrap().provider_type(), ProviderType::Stomp);

        let mock = ProviderConfig::Mock(MockConfig::default());
        assert_eq!(build_provider(&mock).unwrap().provider_type(), ProviderType::Mock);
    }

    #[tokio::test]
    async fn schema_comes_from_snapshot_rows() {
        let mut provider = MockProvider::new(MockConfig {
            row_count: 5,
            ..MockConfig::default()
        });
        let (outcome, fields) = load_snapshot_with_schema(&mut provider, 0).await.unwrap();
        assert_eq!(outcome.rows().len(), 5);
        assert!(fields.contains_key("id"));
        assert!(fields.contains_key("price"));
    }
}

//! # Streaming Provider
//!
//! The connection state machine over a pub/sub transport:
//!
//! ```text
//! Idle -> Connecting -> Snapshot -> Idle | Error
//! Idle -> Connecting -> Realtime -> (Connecting -> Realtime)* -> Idle
//! ```
//!
//! A snapshot uses a throwaway connection with no reconnect policy. Four
//! termination paths race inside one `tokio::select!` loop (end token or row
//! cap from the session, transport failure or disconnect from the event
//! stream, the snapshot timeout) plus the caller's [`DisconnectHandle`]; the
//! session's completion guard lets exactly one of them produce the outcome.
//! The subscription and the connection are torn down before the outcome is
//! returned, whichever path won.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    DataProvider, DisconnectHandle, FeedTask, SnapshotLedger, UPDATE_CHANNEL_CAPACITY, UpdateBatch, UpdateStream,
};
use crate::configs::{ProviderType, TransportConfig};
use crate::core::{
    BatchCallback, ConnectionOutcome, ConnectionState, InboundMessage, Progress, SnapshotSession, Statistics,
    StatisticsTracker, Termination, parse_message,
};
use crate::errors::Result;
use crate::transport::{ConnectPolicy, Subscription, TransportClient, TransportConnector, TransportEvent, TransportEvents};

/// How long `check_connection` waits for the handshake.
pub const CHECK_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct StreamingProvider<C: TransportConnector> {
    kind: ProviderType,
    connector: C,
    config: TransportConfig,
    stats: Arc<StatisticsTracker>,
    handle: DisconnectHandle,
    feed: Option<FeedTask>,
}

impl<C: TransportConnector> StreamingProvider<C> {
    pub fn new(kind: ProviderType, connector: C, config: TransportConfig) -> Self {
        Self {
            kind,
            connector,
            config,
            stats: Arc::new(StatisticsTracker::new()),
            handle: DisconnectHandle::default(),
            feed: None,
        }
    }

    /// Subscribes to the listener topic and asks for the snapshot when a
    /// request topic is configured.
    fn request_snapshot(&self, client: &mut dyn TransportClient) -> Result<Subscription> {
        let subscription = client.subscribe(&self.config.listener_topic)?;
        if let Some(topic) = &self.config.request_topic {
            client.publish(topic, self.config.request_body())?;
            debug!(provider = %self.kind, topic = %topic, "Snapshot requested");
        }
        Ok(subscription)
    }

    fn feed_live(&self) -> bool {
        self.feed.as_ref().is_some_and(FeedTask::is_live)
    }

    async fn stop_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.stop().await;
        }
    }
}

#[async_trait]
impl<C: TransportConnector> DataProvider for StreamingProvider<C> {
    fn provider_type(&self) -> ProviderType {
        self.kind
    }

    async fn check_connection(&mut self) -> Result<bool> {
        let mut client = self.connector.connect(ConnectPolicy::no_reconnect());
        let mut events = client.activate()?;

        let verdict = time::timeout(CHECK_CONNECTION_TIMEOUT, async {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Connected => return true,
                    TransportEvent::SocketError(error) | TransportEvent::ProtocolError(error) => {
                        debug!(provider = %self.kind, %error, "Connection check failed");
                        return false;
                    }
                    TransportEvent::Disconnected => return false,
                    TransportEvent::Message { .. } => {}
                }
            }
            false
        })
        .await
        .unwrap_or_else(|_| {
            debug!(provider = %self.kind, "Connection check timed out");
            false
        });

        client.deactivate().await;
        if verdict {
            self.stats.record_connection_probe();
        }
        info!(provider = %self.kind, endpoint = self.connector.endpoint(), reachable = verdict, "Connection check finished");
        Ok(verdict)
    }

    async fn fetch_snapshot(
        &mut self,
        max_rows: usize,
        on_batch: Option<BatchCallback>,
    ) -> Result<ConnectionOutcome> {
        let cancel = self.handle.arm();
        let mut client = self.connector.connect(ConnectPolicy::no_reconnect());
        let ledger = SnapshotLedger::begin(self.stats.clone(), self.feed_live());
        let mut events = match client.activate() {
            Ok(events) => events,
            Err(e) => {
                ledger.aborted();
                return Err(e);
            }
        };
        info!(
            provider = %self.kind,
            endpoint = self.connector.endpoint(),
            topic = %self.config.listener_topic,
            max_rows,
            "Fetching snapshot"
        );

        let mut session = SnapshotSession::new(
            self.kind.as_str(),
            self.stats.clone(),
            self.config.key_column.clone(),
            self.config.snapshot_end_token.clone(),
            max_rows,
            on_batch,
        );
        let deadline = time::sleep(self.config.snapshot_timeout());
        tokio::pin!(deadline);
        let mut subscription = None;

        let outcome = loop {
            let termination = tokio::select! {
                _ = &mut deadline => Termination::Timeout,
                _ = cancel.cancelled() => Termination::Disconnected,
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => {
                        ledger.connected();
                        match self.request_snapshot(client.as_mut()) {
                            Ok(sub) => {
                                subscription = Some(sub);
                                continue;
                            }
                            Err(e) => Termination::TransportError(e.to_string()),
                        }
                    }
                    Some(TransportEvent::Message { body, .. }) => match session.ingest(&body) {
                        Progress::Finished(outcome) => break outcome,
                        Progress::Continue => continue,
                    },
                    Some(TransportEvent::SocketError(error)) | Some(TransportEvent::ProtocolError(error)) => {
                        Termination::TransportError(error)
                    }
                    Some(TransportEvent::Disconnected) | None => Termination::Disconnected,
                },
            };
            if let Some(outcome) = session.finalize(termination) {
                break outcome;
            }
        };

        if let Some(subscription) = &subscription {
            if let Err(e) = client.unsubscribe(subscription) {
                trace!(provider = %self.kind, error = %e, "Unsubscribe skipped");
            }
        }
        client.deactivate().await;
        ledger.finish(outcome.success);
        Ok(outcome)
    }

    async fn start_realtime(&mut self) -> Result<UpdateStream> {
        self.stop_feed().await;
        let policy = self
            .config
            .reconnect_delay()
            .map_or_else(ConnectPolicy::no_reconnect, ConnectPolicy::reconnect_after);
        let mut client = self.connector.connect(policy);
        self.stats.set_state(ConnectionState::Connecting);
        let events = match client.activate() {
            Ok(events) => events,
            Err(e) => {
                self.stats.set_state(ConnectionState::Error);
                return Err(e);
            }
        };
        // Subscribed before the handshake so the first pushed event is not missed.
        if let Err(e) = client.subscribe(&self.config.listener_topic) {
            client.deactivate().await;
            self.stats.set_state(ConnectionState::Error);
            return Err(e);
        }

        let (updates, stream) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let token = self.handle.arm();
        let worker = RealtimeWorker {
            kind: self.kind,
            client,
            events,
            updates,
            stats: self.stats.clone(),
            end_token: self.config.snapshot_end_token.clone(),
            token: token.clone(),
        };
        info!(provider = %self.kind, topic = %self.config.listener_topic, "Starting real-time feed");
        self.feed = Some(FeedTask::new(token, tokio::spawn(worker.run())));
        Ok(stream)
    }

    async fn disconnect(&mut self) {
        self.handle.disconnect();
        self.stop_feed().await;
        self.stats.record_disconnected();
        self.stats.set_state(ConnectionState::Idle);
    }

    fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    fn watch_statistics(&self) -> watch::Receiver<Statistics> {
        self.stats.subscribe()
    }

    fn disconnect_handle(&self) -> DisconnectHandle {
        self.handle.clone()
    }
}

/// Owns the live client for the lifetime of a real-time feed.
struct RealtimeWorker {
    kind: ProviderType,
    client: Box<dyn TransportClient>,
    events: TransportEvents,
    updates: mpsc::Sender<UpdateBatch>,
    stats: Arc<StatisticsTracker>,
    end_token: String,
    token: CancellationToken,
}

impl RealtimeWorker {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => break,
                event = self.events.recv() => event,
            };
            match event {
                Some(TransportEvent::Connected) => {
                    self.stats.record_connected();
                    self.stats.set_state(ConnectionState::Realtime);
                }
                Some(TransportEvent::Message { body, .. }) => {
                    let Some(rows) = self.decode(&body) else {
                        continue;
                    };
                    self.stats.record_update(rows.len(), body.len());
                    let batch = UpdateBatch {
                        rows,
                        bytes: body.len(),
                    };
                    let delivered = tokio::select! {
                        _ = self.token.cancelled() => break,
                        sent = self.updates.send(batch) => sent.is_ok(),
                    };
                    if !delivered {
                        debug!(provider = %self.kind, "Update stream dropped by consumer");
                        break;
                    }
                }
                Some(TransportEvent::SocketError(error)) | Some(TransportEvent::ProtocolError(error)) => {
                    warn!(provider = %self.kind, %error, "Real-time transport error");
                }
                Some(TransportEvent::Disconnected) => {
                    self.stats.record_disconnected();
                    self.stats.set_state(ConnectionState::Connecting);
                }
                None => {
                    info!(provider = %self.kind, "Real-time transport ended");
                    break;
                }
            }
        }

        self.client.deactivate().await;
        self.stats.record_disconnected();
        self.stats.set_state(ConnectionState::Idle);
    }

    /// Rows of a real-time message. Completion tokens carry no rows here.
    fn decode(&self, body: &str) -> Option<Vec<serde_json::Value>> {
        match parse_message(body, &self.end_token) {
            Ok(InboundMessage::Rows { rows, .. }) => Some(rows),
            Ok(InboundMessage::SnapshotComplete) => {
                debug!(provider = %self.kind, "Ignoring completion token in real-time mode");
                None
            }
            Ok(InboundMessage::Ignored) => None,
            Err(e) => {
                warn!(provider = %self.kind, error = %e, bytes = body.len(), "Skipping malformed update");
                None
            }
        }
    }
}

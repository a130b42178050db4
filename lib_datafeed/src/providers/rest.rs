//! # REST Poller
//!
//! A source without an end token: the snapshot is the first successful page,
//! real-time mode re-fetches the page every `pollIntervalMs` and forwards its
//! rows as one update batch.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    DataProvider, DisconnectHandle, FeedTask, SnapshotLedger, UPDATE_CHANNEL_CAPACITY, UpdateBatch, UpdateStream,
};
use crate::configs::{ProviderType, RestConfig};
use crate::core::{
    BatchCallback, ConnectionOutcome, ConnectionState, InboundMessage, Progress, SnapshotSession, Statistics,
    StatisticsTracker, Termination, detect_rows,
};
use crate::errors::{ProviderError, Result};
use crate::retrieve::{ApiClient, RawResponse};

/// Longest error body quoted in an outcome.
const ERROR_BODY_PREVIEW: usize = 200;

pub struct RestProvider {
    config: RestConfig,
    client: ApiClient,
    stats: Arc<StatisticsTracker>,
    handle: DisconnectHandle,
    feed: Option<FeedTask>,
}

impl RestProvider {
    /// # Errors
    /// `ProviderError::Activation` when `base_url` is not an absolute URL.
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = ApiClient::new(&config.base_url, config.auth_token.clone())?;
        Ok(Self {
            config,
            client,
            stats: Arc::new(StatisticsTracker::new()),
            handle: DisconnectHandle::default(),
            feed: None,
        })
    }

    async fn stop_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.stop().await;
        }
    }
}

/// Rows of one page, or the reason the page is unusable.
fn page_rows(response: RawResponse) -> std::result::Result<Vec<Value>, String> {
    if !response.success {
        let preview: String = response.body.chars().take(ERROR_BODY_PREVIEW).collect();
        return Err(format!("HTTP {}: {}", response.status, preview.trim()));
    }
    let value: Value =
        serde_json::from_str(&response.body).map_err(|e| format!("Invalid JSON response: {e}"))?;
    match detect_rows(value) {
        InboundMessage::Rows { rows, .. } => Ok(rows),
        InboundMessage::SnapshotComplete | InboundMessage::Ignored => Ok(Vec::new()),
    }
}

#[async_trait]
impl DataProvider for RestProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Rest
    }

    async fn check_connection(&mut self) -> Result<bool> {
        let reachable = match self.client.get_raw(&self.config.path).await {
            Ok(response) => response.success,
            Err(e) => {
                debug!(provider = "rest", error = %e, "Connection check failed");
                false
            }
        };
        if reachable {
            self.stats.record_connection_probe();
        }
        info!(provider = "rest", base_url = %self.client.base_url(), reachable, "Connection check finished");
        Ok(reachable)
    }

    async fn fetch_snapshot(
        &mut self,
        max_rows: usize,
        on_batch: Option<BatchCallback>,
    ) -> Result<ConnectionOutcome> {
        let cancel = self.handle.arm();
        let ledger = SnapshotLedger::begin(self.stats.clone(), self.feed.as_ref().is_some_and(FeedTask::is_live));
        let mut session = SnapshotSession::new(
            "rest",
            self.stats.clone(),
            self.config.key_column.clone(),
            String::new(),
            max_rows,
            on_batch,
        );

        let response = tokio::select! {
            _ = cancel.cancelled() => None,
            response = self.client.get_raw(&self.config.path) => Some(response),
        };

        let outcome = match response {
            None => session.finalize(Termination::Disconnected),
            Some(Err(e)) => session.finalize(Termination::TransportError(e.to_string())),
            Some(Ok(response)) => {
                let bytes = response.body.len();
                match page_rows(response) {
                    Err(error) => session.finalize(Termination::TransportError(error)),
                    Ok(rows) => {
                        ledger.connected();
                        match session.ingest_rows(rows, bytes) {
                            Progress::Finished(outcome) => Some(outcome),
                            Progress::Continue => session.finalize(Termination::PageComplete),
                        }
                    }
                }
            }
        }
        .unwrap_or_else(|| ConnectionOutcome::failure("Snapshot finalized twice"));

        ledger.finish(outcome.success);
        Ok(outcome)
    }

    async fn start_realtime(&mut self) -> Result<UpdateStream> {
        self.stop_feed().await;
        let (updates, stream) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let token = self.handle.arm();
        let poller = Poller {
            client: self.client.clone(),
            path: self.config.path.clone(),
            interval: self.config.poll_interval(),
            updates,
            stats: self.stats.clone(),
            token: token.clone(),
        };
        self.stats.set_state(ConnectionState::Realtime);
        self.stats.record_connected();
        info!(provider = "rest", interval_ms = self.config.poll_interval_ms, "Starting poller");
        self.feed = Some(FeedTask::new(token, tokio::spawn(poller.run())));
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

struct Poller {
    client: ApiClient,
    path: String,
    interval: std::time::Duration,
    updates: mpsc::Sender<UpdateBatch>,
    stats: Arc<StatisticsTracker>,
    token: CancellationToken,
}

impl Poller {
    async fn run(self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let batch = match self.poll().await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(provider = "rest", error = %e, "Poll failed");
                    continue;
                }
            };
            if batch.rows.is_empty() {
                continue;
            }
            self.stats.record_update(batch.rows.len(), batch.bytes);
            let delivered = tokio::select! {
                _ = self.token.cancelled() => break,
                sent = self.updates.send(batch) => sent.is_ok(),
            };
            if !delivered {
                debug!(provider = "rest", "Update stream dropped by consumer");
                break;
            }
        }
        self.stats.record_disconnected();
        self.stats.set_state(ConnectionState::Idle);
    }

    async fn poll(&self) -> Result<UpdateBatch> {
        let response = tokio::select! {
            _ = self.token.cancelled() => return Err(ProviderError::NotConnected),
            response = self.client.get_raw(&self.path) => response?,
        };
        let bytes = response.body.len();
        let rows = page_rows(response).map_err(ProviderError::Http)?;
        Ok(UpdateBatch { rows, bytes })
    }
}

//! # AppData Provider
//!
//! Rows owned by the application itself. The snapshot is the configured row
//! set; while live, rows pushed through an [`AppDataFeeder`] are delivered as
//! update batches.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::info;

use super::{DataProvider, DisconnectHandle, SnapshotLedger, UPDATE_CHANNEL_CAPACITY, UpdateBatch, UpdateStream};
use crate::configs::{AppDataConfig, ProviderType};
use crate::core::{
    BatchCallback, ConnectionOutcome, ConnectionState, Progress, SnapshotSession, Statistics, StatisticsTracker,
    Termination,
};
use crate::errors::{ProviderError, Result};

type LiveSlot = Arc<Mutex<Option<mpsc::Sender<UpdateBatch>>>>;

/// Pushes rows into a live [`AppDataProvider`] from anywhere.
#[derive(Debug, Clone)]
pub struct AppDataFeeder {
    live: LiveSlot,
    stats: Arc<StatisticsTracker>,
}

impl AppDataFeeder {
    /// Delivers `rows` as one update batch.
    ///
    /// # Errors
    /// `ProviderError::NotConnected` when the provider is not in real-time mode.
    pub async fn push(&self, rows: Vec<Value>) -> Result<()> {
        let sender = lock(&self.live).clone().ok_or(ProviderError::NotConnected)?;
        let bytes = serde_json::to_string(&rows)?.len();
        let count = rows.len();
        sender
            .send(UpdateBatch { rows, bytes })
            .await
            .map_err(|_| ProviderError::NotConnected)?;
        self.stats.record_update(count, bytes);
        Ok(())
    }
}

fn lock(slot: &LiveSlot) -> MutexGuard<'_, Option<mpsc::Sender<UpdateBatch>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AppDataProvider {
    config: AppDataConfig,
    stats: Arc<StatisticsTracker>,
    handle: DisconnectHandle,
    live: LiveSlot,
}

impl AppDataProvider {
    pub fn new(config: AppDataConfig) -> Self {
        Self {
            config,
            stats: Arc::new(StatisticsTracker::new()),
            handle: DisconnectHandle::default(),
            live: Arc::default(),
        }
    }

    pub fn feeder(&self) -> AppDataFeeder {
        AppDataFeeder {
            live: self.live.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Shorthand for `self.feeder().push(rows)`.
    pub async fn push(&self, rows: Vec<Value>) -> Result<()> {
        self.feeder().push(rows).await
    }
}

#[async_trait]
impl DataProvider for AppDataProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::AppData
    }

    async fn check_connection(&mut self) -> Result<bool> {
        self.stats.record_connection_probe();
        Ok(true)
    }

    async fn fetch_snapshot(
        &mut self,
        max_rows: usize,
        on_batch: Option<BatchCallback>,
    ) -> Result<ConnectionOutcome> {
        let ledger = SnapshotLedger::begin(self.stats.clone(), lock(&self.live).is_some());
        ledger.connected();
        let mut session = SnapshotSession::new(
            "appdata",
            self.stats.clone(),
            self.config.key_column.clone(),
            String::new(),
            max_rows,
            on_batch,
        );
        let bytes = serde_json::to_string(&self.config.rows)?.len();
        let outcome = match session.ingest_rows(self.config.rows.clone(), bytes) {
            Progress::Finished(outcome) => Some(outcome),
            Progress::Continue => session.finalize(Termination::PageComplete),
        }
        .unwrap_or_else(|| ConnectionOutcome::failure("Snapshot finalized twice"));

        ledger.finish(outcome.success);
        Ok(outcome)
    }

    async fn start_realtime(&mut self) -> Result<UpdateStream> {
        let (sender, stream) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        *lock(&self.live) = Some(sender);
        self.stats.record_connected();
        self.stats.set_state(ConnectionState::Realtime);
        info!(provider = "appdata", "Accepting pushed rows");
        Ok(stream)
    }

    async fn disconnect(&mut self) {
        self.handle.disconnect();
        lock(&self.live).take();
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

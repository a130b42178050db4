//! # Mock Provider
//!
//! Seeded market-style rows for demos and tests. The same `MockConfig`
//! always produces the same snapshot; real-time mode re-prices random rows
//! of that snapshot on every tick.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    DataProvider, DisconnectHandle, FeedTask, SnapshotLedger, UPDATE_CHANNEL_CAPACITY, UpdateBatch, UpdateStream,
};
use crate::configs::{MockConfig, ProviderType};
use crate::core::{
    BatchCallback, ConnectionOutcome, ConnectionState, Progress, SnapshotSession, Statistics, StatisticsTracker,
    Termination,
};
use crate::errors::Result;

/// Rows per snapshot batch handed to the progress callback.
pub const MOCK_BATCH_SIZE: usize = 100;

const SYMBOLS: [&str; 8] = ["AAPL", "MSFT", "GOOG", "AMZN", "NVDA", "META", "TSLA", "NFLX"];
const VENUES: [&str; 3] = ["XNAS", "XNYS", "ARCX"];
/// 2024-01-02T14:30:00Z, the first row's timestamp.
const BASE_EPOCH_SECS: i64 = 1_704_205_800;

pub struct MockProvider {
    config: MockConfig,
    stats: Arc<StatisticsTracker>,
    handle: DisconnectHandle,
    feed: Option<FeedTask>,
}

impl MockProvider {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            stats: Arc::new(StatisticsTracker::new()),
            handle: DisconnectHandle::default(),
            feed: None,
        }
    }

    /// The first `count` snapshot rows for this config's seed.
    pub fn generate_rows(&self, count: usize) -> Vec<Value> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        (0..count).map(|index| mock_row(&mut rng, &self.config.key_column, index)).collect()
    }

    async fn stop_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.stop().await;
        }
    }
}

fn timestamp(offset_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(BASE_EPOCH_SECS + offset_secs, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn price(rng: &mut StdRng) -> f64 {
    (rng.random_range(10.0..500.0_f64) * 100.0).round() / 100.0
}

fn mock_row(rng: &mut StdRng, key_column: &str, index: usize) -> Value {
    let mut row = json!({
        "symbol": SYMBOLS[index % SYMBOLS.len()],
        "price": price(rng),
        "volume": rng.random_range(100..1_000_000_u64),
        "active": rng.random_bool(0.8),
        "updatedAt": timestamp(index as i64),
        "quote": {
            "bid": price(rng),
            "venue": VENUES[index % VENUES.len()],
        },
    });
    row[key_column] = json!(index);
    row
}

fn repriced_row(rng: &mut StdRng, key_column: &str, index: usize, tick: u64) -> Value {
    let mut row = json!({
        "price": price(rng),
        "volume": rng.random_range(100..1_000_000_u64),
        "updatedAt": timestamp(index as i64 + tick as i64),
    });
    row[key_column] = json!(index);
    row
}

#[async_trait]
impl DataProvider for MockProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Mock
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
        let cancel = self.handle.arm();
        let count = match max_rows {
            0 => self.config.row_count,
            cap => cap.min(self.config.row_count),
        };
        let ledger = SnapshotLedger::begin(self.stats.clone(), self.feed.as_ref().is_some_and(FeedTask::is_live));
        ledger.connected();

        let mut session = SnapshotSession::new(
            "mock",
            self.stats.clone(),
            Some(self.config.key_column.clone()),
            String::new(),
            max_rows,
            on_batch,
        );
        let rows = self.generate_rows(count);
        let mut finished = None;
        for chunk in rows.chunks(MOCK_BATCH_SIZE) {
            if cancel.is_cancelled() {
                finished = session.finalize(Termination::Disconnected);
                break;
            }
            let bytes = serde_json::to_string(chunk)?.len();
            if let Progress::Finished(outcome) = session.ingest_rows(chunk.to_vec(), bytes) {
                finished = Some(outcome);
                break;
            }
            tokio::task::yield_now().await;
        }
        let outcome = match finished {
            Some(outcome) => outcome,
            None => session
                .finalize(Termination::PageComplete)
                .unwrap_or_else(|| ConnectionOutcome::failure("Snapshot finalized twice")),
        };

        ledger.finish(outcome.success);
        Ok(outcome)
    }

    async fn start_realtime(&mut self) -> Result<UpdateStream> {
        self.stop_feed().await;
        let (updates, stream) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let token = self.handle.arm();
        let ticker = Ticker {
            config: self.config.clone(),
            updates,
            stats: self.stats.clone(),
            token: token.clone(),
        };
        self.stats.record_connected();
        self.stats.set_state(ConnectionState::Realtime);
        info!(provider = "mock", interval_ms = self.config.update_interval_ms, "Starting mock updates");
        self.feed = Some(FeedTask::new(token, tokio::spawn(ticker.run())));
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

struct Ticker {
    config: MockConfig,
    updates: mpsc::Sender<UpdateBatch>,
    stats: Arc<StatisticsTracker>,
    token: CancellationToken,
}

impl Ticker {
    async fn run(self) {
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));
        let period = std::time::Duration::from_millis(self.config.update_interval_ms.max(1));
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let universe = self.config.row_count.max(1);
        let mut tick = 0_u64;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = interval.tick() => {}
            }
            tick += 1;
            let rows: Vec<Value> = (0..self.config.update_batch_size)
                .map(|_| {
                    let index = rng.random_range(0..universe);
                    repriced_row(&mut rng, &self.config.key_column, index, tick)
                })
                .collect();
            let bytes = serde_json::to_string(&rows).map(|text| text.len()).unwrap_or_default();
            self.stats.record_update(rows.len(), bytes);

            let delivered = tokio::select! {
                _ = self.token.cancelled() => break,
                sent = self.updates.send(UpdateBatch { rows, bytes }) => sent.is_ok(),
            };
            if !delivered {
                debug!(provider = "mock", "Update stream dropped by consumer");
                break;
            }
        }
        self.stats.record_disconnected();
        self.stats.set_state(ConnectionState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn config(rows: usize) -> MockConfig {
        MockConfig {
            seed: 7,
            row_count: rows,
            ..MockConfig::default()
        }
    }

    #[test]
    fn same_seed_same_rows() {
        let a = MockProvider::new(config(10)).generate_rows(10);
        let b = MockProvider::new(config(10)).generate_rows(10);
        assert_eq!(a, b);
        assert_eq!(a[3]["id"], json!(3));
        assert_eq!(a[0]["updatedAt"], json!("2024-01-02T14:30:00Z"));
    }

    #[tokio::test]
    async fn snapshot_is_batched_and_capped() {
        let mut provider = MockProvider::new(config(250));
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let outcome = provider
            .fetch_snapshot(
                0,
                Some(Box::new(move |rows: &[Value], total: usize| {
                    sink.lock().unwrap().push((rows.len(), total));
                })),
            )
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.rows().len(), 250);
        assert_eq!(*batches.lock().unwrap(), vec![(100, 100), (100, 200), (50, 250)]);

        let capped = provider.fetch_snapshot(30, None).await.unwrap();
        assert_eq!(capped.rows().len(), 30);
        assert_eq!(provider.statistics().snapshot_rows_received, 280);
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_reprices_known_keys() {
        let mut provider = MockProvider::new(MockConfig {
            update_interval_ms: 100,
            update_batch_size: 4,
            ..config(5)
        });
        let mut stream = provider.start_realtime().await.unwrap();
        let batch = stream.recv().await.unwrap();
        assert_eq!(batch.rows.len(), 4);
        for row in &batch.rows {
            assert!(row["id"].as_u64().unwrap() < 5);
        }
        assert_eq!(provider.statistics().update_rows_received, 4);

        provider.disconnect().await;
        assert!(stream.recv().await.is_none());
        assert!(!provider.statistics().is_connected);
    }
}

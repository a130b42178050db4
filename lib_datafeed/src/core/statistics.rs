//! # Statistics Tracker
//!
//! Monotonic traffic counters plus the provider's current mode. One tracker
//! belongs to exactly one provider (shared with that provider's real-time task
//! through an `Arc`); counters are never reset, a new provider starts from
//! zero.
//!
//! The counters live inside a `tokio::sync::watch` channel: readers take a
//! value copy with [`StatisticsTracker::snapshot`], and anyone who wants push
//! notification holds a receiver from [`StatisticsTracker::subscribe`]. The
//! channel only keeps the latest value, so a slow observer can never back up
//! the data path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::state::{ConnectionState, ProviderMode};

/// Point-in-time copy of a provider's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub snapshot_rows_received: u64,
    pub update_rows_received: u64,
    /// Sum of `snapshot_bytes_received` and `update_bytes_received`.
    pub bytes_received: u64,
    pub snapshot_bytes_received: u64,
    pub update_bytes_received: u64,
    pub connection_count: u64,
    pub disconnection_count: u64,
    pub mode: ProviderMode,
    pub state: ConnectionState,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Owner of a provider's `Statistics`.
#[derive(Debug)]
pub struct StatisticsTracker {
    inner: watch::Sender<Statistics>,
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsTracker {
    pub fn new() -> Self {
        let (inner, _) = watch::channel(Statistics::default());
        Self { inner }
    }

    /// Rows/bytes of one inbound snapshot message.
    pub fn record_snapshot(&self, rows: usize, bytes: usize) {
        self.inner.send_modify(|stats| {
            stats.snapshot_rows_received += rows as u64;
            stats.snapshot_bytes_received += bytes as u64;
            stats.bytes_received += bytes as u64;
            stats.last_message_at = Some(Utc::now());
        });
    }

    /// Rows/bytes of one real-time update batch.
    pub fn record_update(&self, rows: usize, bytes: usize) {
        self.inner.send_modify(|stats| {
            stats.update_rows_received += rows as u64;
            stats.update_bytes_received += bytes as u64;
            stats.bytes_received += bytes as u64;
            stats.last_message_at = Some(Utc::now());
        });
    }

    pub fn record_connected(&self) {
        self.inner.send_modify(|stats| {
            stats.connection_count += 1;
            stats.is_connected = true;
        });
    }

    /// Counts a connection that was opened only to prove reachability and
    /// closed straight away. `is_connected` is left untouched.
    pub fn record_connection_probe(&self) {
        self.inner.send_modify(|stats| stats.connection_count += 1);
    }

    /// Counts a torn-down connection. A no-op when nothing was connected.
    pub fn record_disconnected(&self) {
        self.inner.send_modify(|stats| {
            if stats.is_connected {
                stats.disconnection_count += 1;
                stats.is_connected = false;
            }
        });
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.inner.send_if_modified(|stats| {
            if stats.state == state {
                return false;
            }
            stats.state = state;
            stats.mode = state.mode();
            true
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.borrow().state
    }

    /// Value copy of the current counters.
    pub fn snapshot(&self) -> Statistics {
        self.inner.borrow().clone()
    }

    /// A receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<Statistics> {
        self.inner.subscribe()
    }
}

//! # Snapshot Session
//!
//! The accumulation half of snapshot acquisition, shared by every provider:
//! classify each inbound body, merge its rows into the deduplication buffer,
//! report progress, count traffic and decide when the row cap is hit. The
//! driving provider owns the transport and the timers; it hands bodies in and
//! asks the session to finalize when a termination path fires.
//!
//! Finalization goes through a [`CompletionGuard`], so whichever termination
//! path arrives first produces the one [`ConnectionOutcome`] and every later
//! attempt gets `None`.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::core::completion::CompletionGuard;
use crate::core::dedup_buffer::DeduplicationBuffer;
use crate::core::message::{InboundMessage, parse_message};
use crate::core::outcome::ConnectionOutcome;
use crate::core::statistics::StatisticsTracker;

/// Per-batch progress callback: the raw rows just received and the buffer's
/// size after merging them.
pub type BatchCallback = Box<dyn FnMut(&[Value], usize) + Send>;

pub const TIMEOUT_NO_DATA: &str = "Snapshot timeout - no data received";
pub const DISCONNECT_NO_DATA: &str = "No data received";

/// Why a snapshot ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The source sent its end-of-snapshot token.
    EndToken,
    /// The buffer reached the row cap.
    MaxRows,
    /// A source with no end token delivered its whole page.
    PageComplete,
    /// Socket or protocol failure, with the transport's error text.
    TransportError(String),
    /// The connection went away, or the caller disconnected.
    Disconnected,
    Timeout,
}

/// Result of feeding one message to the session.
#[derive(Debug)]
pub enum Progress {
    Continue,
    Finished(ConnectionOutcome),
}

/// One snapshot acquisition in flight.
pub struct SnapshotSession {
    provider: &'static str,
    buffer: DeduplicationBuffer,
    guard: CompletionGuard,
    key_column: Option<String>,
    end_token: String,
    max_rows: usize,
    stats: Arc<StatisticsTracker>,
    on_batch: Option<BatchCallback>,
}

impl SnapshotSession {
    /// A `max_rows` of zero means no cap.
    pub fn new(
        provider: &'static str,
        stats: Arc<StatisticsTracker>,
        key_column: Option<String>,
        end_token: impl Into<String>,
        max_rows: usize,
        on_batch: Option<BatchCallback>,
    ) -> Self {
        Self {
            provider,
            buffer: DeduplicationBuffer::new(),
            guard: CompletionGuard::new(),
            key_column,
            end_token: end_token.into(),
            max_rows: if max_rows == 0 { usize::MAX } else { max_rows },
            stats,
            on_batch,
        }
    }

    /// Parses and applies one raw message body.
    pub fn ingest(&mut self, body: &str) -> Progress {
        if self.guard.is_complete() {
            return Progress::Continue;
        }
        match parse_message(body, &self.end_token) {
            Err(e) => {
                warn!(provider = self.provider, error = %e, bytes = body.len(), "Skipping malformed message");
                Progress::Continue
            }
            Ok(InboundMessage::SnapshotComplete) => self.finish(Termination::EndToken),
            Ok(InboundMessage::Ignored) => {
                debug!(provider = self.provider, "Ignoring scalar message");
                Progress::Continue
            }
            Ok(InboundMessage::Rows { rows, .. }) => self.ingest_rows(rows, body.len()),
        }
    }

    /// Applies rows that arrived as one message of `bytes` bytes.
    pub fn ingest_rows(&mut self, rows: Vec<Value>, bytes: usize) -> Progress {
        if self.guard.is_complete() {
            return Progress::Continue;
        }
        let key_column = self.key_column.as_deref();
        for row in &rows {
            self.buffer.merge(row.clone(), key_column);
        }
        let total = self.buffer.len();
        if let Some(on_batch) = self.on_batch.as_mut() {
            on_batch(&rows, total);
        }
        self.stats.record_snapshot(rows.len(), bytes);
        trace!(provider = self.provider, rows = rows.len(), bytes, total, "Snapshot batch merged");

        if total >= self.max_rows {
            return self.finish(Termination::MaxRows);
        }
        Progress::Continue
    }

    /// Finalizes via `reason`, or returns `None` if another path got there first.
    pub fn finalize(&mut self, reason: Termination) -> Option<ConnectionOutcome> {
        if !self.guard.try_complete() {
            return None;
        }
        let buffer = std::mem::take(&mut self.buffer);
        let partial = !buffer.is_empty();
        let rows = buffer.into_rows(self.max_rows);
        let count = rows.len();

        let outcome = match reason {
            Termination::EndToken | Termination::MaxRows | Termination::PageComplete => {
                info!(provider = self.provider, rows = count, reason = ?reason, "Snapshot complete");
                ConnectionOutcome::success(rows)
            }
            Termination::TransportError(error) if partial => {
                info!(provider = self.provider, rows = count, %error, "Transport failed mid-snapshot, keeping partial rows");
                ConnectionOutcome::success(rows)
            }
            Termination::TransportError(error) => {
                info!(provider = self.provider, %error, "Snapshot failed");
                ConnectionOutcome::failure(error)
            }
            Termination::Disconnected if partial => {
                info!(provider = self.provider, rows = count, "Disconnected mid-snapshot, keeping partial rows");
                ConnectionOutcome::success(rows)
            }
            Termination::Disconnected => {
                info!(provider = self.provider, "Disconnected before any snapshot data");
                ConnectionOutcome::failure(DISCONNECT_NO_DATA)
            }
            Termination::Timeout if partial => {
                info!(provider = self.provider, rows = count, "Snapshot timed out, keeping partial rows");
                ConnectionOutcome::success(rows)
            }
            Termination::Timeout => {
                info!(provider = self.provider, "Snapshot timed out with no data");
                ConnectionOutcome::failure(TIMEOUT_NO_DATA)
            }
        };
        Some(outcome)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn finish(&mut self, reason: Termination) -> Progress {
        match self.finalize(reason) {
            Some(outcome) => Progress::Finished(outcome),
            None => Progress::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn session(key: Option<&str>, max_rows: usize) -> (SnapshotSession, Arc<StatisticsTracker>) {
        let stats = Arc::new(StatisticsTracker::new());
        let session = SnapshotSession::new(
            "test",
            stats.clone(),
            key.map(str::to_string),
            "Success",
            max_rows,
            None,
        );
        (session, stats)
    }

    fn finished(progress: Progress) -> ConnectionOutcome {
        match progress {
            Progress::Finished(outcome) => outcome,
            Progress::Continue => panic!("session should have finished"),
        }
    }

    #[test]
    fn end_token_returns_accumulated_rows() {
        let (mut session, stats) = session(None, 100);
        assert!(matches!(session.ingest(r#"{"rows":[{"a":1},{"a":2}]}"#), Progress::Continue));
        assert!(matches!(session.ingest(r#"{"a":3}"#), Progress::Continue));
        let outcome = finished(session.ingest(r#"{"snapshotToken":"Success"}"#));
        assert_eq!(outcome.rows(), &[json!({"a":1}), json!({"a":2}), json!({"a":3})]);
        assert_eq!(stats.snapshot().snapshot_rows_received, 3);
    }

    #[test]
    fn row_cap_truncates_in_delivery_order() {
        let (mut session, _) = session(None, 2);
        let outcome = finished(session.ingest(r#"[{"n":1},{"n":2},{"n":3}]"#));
        assert_eq!(outcome.rows(), &[json!({"n":1}), json!({"n":2})]);
    }

    #[test]
    fn key_column_collapses_duplicates_before_the_cap() {
        let (mut session, stats) = session(Some("id"), 2);
        session.ingest(r#"{"id":1,"v":"a"}"#);
        assert!(matches!(session.ingest(r#"{"id":1,"v":"b"}"#), Progress::Continue));
        assert_eq!(session.buffered(), 1);
        assert_eq!(stats.snapshot().snapshot_rows_received, 2);
    }

    #[test]
    fn only_the_first_termination_path_resolves() {
        let (mut session, _) = session(None, 100);
        session.ingest(r#"{"a":1}"#);
        assert!(session.finalize(Termination::Timeout).is_some());
        assert!(session.finalize(Termination::Disconnected).is_none());
        assert!(matches!(session.ingest(r#"{"status":"Success"}"#), Progress::Continue));
    }

    #[test]
    fn failures_without_rows_carry_their_text() {
        let (mut session, _) = session(None, 100);
        let outcome = session.finalize(Termination::TransportError("boom".into())).unwrap();
        assert_eq!(outcome, ConnectionOutcome::failure("boom"));

        let (mut session, _) = self::session(None, 100);
        assert_eq!(
            session.finalize(Termination::Timeout).unwrap().error.as_deref(),
            Some(TIMEOUT_NO_DATA)
        );

        let (mut session, _) = self::session(None, 100);
        assert_eq!(
            session.finalize(Termination::Disconnected).unwrap().error.as_deref(),
            Some(DISCONNECT_NO_DATA)
        );
    }

    #[test]
    fn failures_with_rows_downgrade_to_partial_success() {
        let (mut session, _) = session(None, 100);
        session.ingest(r#"{"a":1}"#);
        let outcome = session.finalize(Termination::TransportError("reset".into())).unwrap();
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.rows().len(), 1);
    }

    #[test]
    fn malformed_and_scalar_messages_are_skipped() {
        let (mut session, stats) = session(None, 100);
        assert!(matches!(session.ingest("{oops"), Progress::Continue));
        assert!(matches!(session.ingest("42"), Progress::Continue));
        assert_eq!(session.buffered(), 0);
        assert_eq!(stats.snapshot().bytes_received, 0);
    }

    #[test]
    fn batch_callback_sees_raw_rows_and_running_total() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut session = SnapshotSession::new(
            "test",
            Arc::new(StatisticsTracker::new()),
            Some("id".into()),
            "Success",
            100,
            Some(Box::new(move |rows: &[Value], total: usize| {
                sink.lock().unwrap().push((rows.len(), total));
            })),
        );
        session.ingest(r#"[{"id":1},{"id":2}]"#);
        session.ingest(r#"[{"id":2},{"id":3}]"#);
        assert_eq!(*seen.lock().unwrap(), vec![(2, 2), (2, 3)]);
    }

    #[test]
    fn zero_cap_means_unbounded() {
        let (mut session, _) = session(None, 0);
        assert!(matches!(session.ingest(r#"[{"a":1},{"a":2}]"#), Progress::Continue));
    }
}

//! # Core Engine Module
//!
//! The stateful building blocks every provider is assembled from. None of
//! these components know which transport feeds them.
//!
//! ## Core Components:
//!
//! - **`dedup_buffer`**: keyed "latest wins, original slot" accumulator used
//!   for the lifetime of one snapshot acquisition.
//! - **`statistics`**: traffic counters and current mode, owned by one
//!   provider, readable at any time and observable through a watch channel.
//! - **`completion`**: the single-resolution guard that lets exactly one
//!   termination path finalize a snapshot.
//! - **`state`**: the connection state machine's states.
//! - **`message`**: classification of inbound message bodies.
//! - **`snapshot`**: the per-acquisition session that merges rows and
//!   resolves exactly one `ConnectionOutcome`.
//! - **`registry`**: the lifecycle manager holding providers by connection ID,
//!   with reference counting and a linger period before teardown.

/// Keyed accumulator for snapshot rows.
pub mod dedup_buffer;
/// Traffic counters and mode tracking.
pub mod statistics;
/// Single-resolution completion guard.
pub mod completion;
/// Connection lifecycle states.
pub mod state;
/// Inbound message shape detection.
pub mod message;
/// Snapshot outcome type.
pub mod outcome;
/// Snapshot accumulation and termination.
pub mod snapshot;
/// Provider instances keyed by logical connection ID.
#[cfg(feature = "providers")]
pub mod registry;

// --- Public API Re-exports ---
pub use completion::CompletionGuard;
pub use dedup_buffer::DeduplicationBuffer;
pub use message::{InboundMessage, RowSource, detect_rows, detect_shape, parse_message};
pub use outcome::ConnectionOutcome;
pub use snapshot::{BatchCallback, Progress, SnapshotSession, Termination};
pub use state::{ConnectionState, ProviderMode};
pub use statistics::{Statistics, StatisticsTracker};
#[cfg(feature = "providers")]
pub use registry::ProviderRegistry;

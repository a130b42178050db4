//! Error type shared by every folder of the crate.
//!
//! Connectivity problems met while a snapshot is in flight are *not* errors:
//! they are folded into a `ConnectionOutcome`. A `ProviderError` reaching the
//! caller of `check_connection`/`fetch_snapshot` means the transport could not
//! even be started.

use thiserror::Error;

/// Errors raised by providers, transports and configuration loading.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The transport client could not be started (malformed URL, bad scheme, no runtime).
    #[error("Failed to activate transport: {0}")]
    Activation(String),

    /// An operation needed a live transport but none is active.
    #[error("Transport is not connected")]
    NotConnected,

    /// A transport-level failure outside the snapshot outcome path.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider '{0}' is not registered")]
    UnknownProvider(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ProviderError>;

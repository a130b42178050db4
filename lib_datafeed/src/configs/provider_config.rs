use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body published to the request topic when none is configured.
pub const DEFAULT_REQUEST_BODY: &str = "START";
/// End-of-snapshot sentinel when none is configured.
pub const DEFAULT_END_TOKEN: &str = "Success";
/// Snapshot timeout when none is configured.
pub const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 60_000;

/// # Transport Configuration
///
/// Connection parameters for the topic-based streaming providers (STOMP, raw
/// WebSocket, Socket.IO).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Endpoint URL (`ws://` or `wss://`).
    pub websocket_url: String,
    /// Topic (STOMP destination, Socket.IO event) carrying snapshot and update rows.
    pub listener_topic: String,
    /// Topic the start-snapshot request is published to, if the source needs one.
    #[serde(default)]
    pub request_topic: Option<String>,
    /// Body of the start-snapshot request. Defaults to `START`.
    #[serde(default)]
    pub request_body: Option<String>,
    /// Value of `snapshotToken`/`status` that marks the end of the snapshot.
    #[serde(default = "default_end_token")]
    pub snapshot_end_token: String,
    /// Field whose value identifies a row for deduplication.
    #[serde(default)]
    pub key_column: Option<String>,
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
    /// Default row cap used when the caller has no cap of its own.
    #[serde(default)]
    pub max_rows: Option<usize>,
    /// Presentation hint for downstream consumers only.
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
    /// Reconnect delay for real-time feeds. `None` disables reconnects.
    #[serde(default)]
    pub reconnect_delay_ms: Option<u64>,
    /// Socket.IO namespace; `/` when unset. Ignored by the other transports.
    #[serde(default)]
    pub namespace: Option<String>,
}

fn default_end_token() -> String {
    DEFAULT_END_TOKEN.to_string()
}

fn default_snapshot_timeout_ms() -> u64 {
    DEFAULT_SNAPSHOT_TIMEOUT_MS
}

fn default_heartbeat_ms() -> u64 {
    10_000
}

impl TransportConfig {
    /// A config with every optional field at its default.
    pub fn new(websocket_url: impl Into<String>, listener_topic: impl Into<String>) -> Self {
        Self {
            websocket_url: websocket_url.into(),
            listener_topic: listener_topic.into(),
            request_topic: None,
            request_body: None,
            snapshot_end_token: default_end_token(),
            key_column: None,
            snapshot_timeout_ms: DEFAULT_SNAPSHOT_TIMEOUT_MS,
            max_rows: None,
            data_type: None,
            heartbeat_outgoing_ms: default_heartbeat_ms(),
            heartbeat_incoming_ms: default_heartbeat_ms(),
            reconnect_delay_ms: None,
            namespace: None,
        }
    }

    pub fn request_body(&self) -> &str {
        self.request_body.as_deref().unwrap_or(DEFAULT_REQUEST_BODY)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.reconnect_delay_ms.map(Duration::from_millis)
    }
}

/// # REST Poller Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestConfig {
    /// Absolute base URL, e.g. `https://api.example.com/v1/`.
    pub base_url: String,
    /// Path joined to `base_url` for every poll.
    #[serde(default)]
    pub path: String,
    /// Optional bearer token.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub key_column: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub data_type: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

impl RestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// # Mock Generator Configuration
///
/// Drives a deterministic row generator; the same seed always yields the same
/// snapshot and update sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfig {
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_mock_rows")]
    pub row_count: usize,
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default = "default_update_batch")]
    pub update_batch_size: usize,
    #[serde(default = "default_mock_key")]
    pub key_column: String,
}

fn default_mock_rows() -> usize {
    1_000
}

fn default_update_interval_ms() -> u64 {
    1_000
}

fn default_update_batch() -> usize {
    10
}

fn default_mock_key() -> String {
    "id".to_string()
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            row_count: default_mock_rows(),
            update_interval_ms: default_update_interval_ms(),
            update_batch_size: default_update_batch(),
            key_column: default_mock_key(),
        }
    }
}

/// # Static AppData Configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDataConfig {
    #[serde(default)]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub key_column: Option<String>,
}

/// Which provider implementation a config selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Stomp,
    WebSocket,
    SocketIo,
    Rest,
    Mock,
    AppData,
}

impl ProviderType {
    /// The wire name, also used as the `provider` field in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::Stomp => "stomp",
            ProviderType::WebSocket => "websocket",
            ProviderType::SocketIo => "socketio",
            ProviderType::Rest => "rest",
            ProviderType::Mock => "mock",
            ProviderType::AppData => "appdata",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Provider Configuration
///
/// Tagged by `providerType` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "providerType", rename_all = "lowercase")]
pub enum ProviderConfig {
    Stomp(TransportConfig),
    #[serde(rename = "websocket")]
    WebSocket(TransportConfig),
    #[serde(rename = "socketio")]
    SocketIo(TransportConfig),
    Rest(RestConfig),
    Mock(MockConfig),
    #[serde(rename = "appdata")]
    AppData(AppDataConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderConfig::Stomp(_) => ProviderType::Stomp,
            ProviderConfig::WebSocket(_) => ProviderType::WebSocket,
            ProviderConfig::SocketIo(_) => ProviderType::SocketIo,
            ProviderConfig::Rest(_) => ProviderType::Rest,
            ProviderConfig::Mock(_) => ProviderType::Mock,
            ProviderConfig::AppData(_) => ProviderType::AppData,
        }
    }

    /// Default snapshot row cap, where the provider config carries one.
    pub fn max_rows(&self) -> Option<usize> {
        match self {
            ProviderConfig::Stomp(t) | ProviderConfig::WebSocket(t) | ProviderConfig::SocketIo(t) => {
                t.max_rows
            }
            ProviderConfig::Mock(m) => Some(m.row_count),
            ProviderConfig::Rest(_) | ProviderConfig::AppData(_) => None,
        }
    }
}

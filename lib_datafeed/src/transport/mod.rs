//! # Transport Module
//!
//! Pub/sub clients the streaming provider talks through. Every client speaks
//! over one `tokio-tungstenite` WebSocket, runs its socket on a spawned task,
//! and reports lifecycle and traffic as a stream of [`TransportEvent`]s.
//!
//! ## Contained Modules:
//!
//! - **`socket`**: the shared connection driver (connect, read/write loop,
//!   heart-beats, reconnect, subscription replay) parameterized by a
//!   [`socket::WireProtocol`].
//! - **`stomp`**: STOMP 1.2 frame codec and protocol.
//! - **`websocket`**: raw text-frame protocol without topics.
//! - **`socketio`**: Engine.IO v4 / Socket.IO packet codec and protocol.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;

/// Shared socket driver.
pub mod socket;
/// Socket.IO over Engine.IO v4.
pub mod socketio;
/// STOMP 1.2.
pub mod stomp;
/// Plain WebSocket text frames.
pub mod websocket;

pub use socket::SocketClient;
pub use socketio::{SocketIoClient, SocketIoConnector};
pub use stomp::{StompClient, StompConnector};
pub use websocket::{WebSocketClient, WebSocketConnector};

/// Lifecycle and traffic notifications from an active client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The protocol-level handshake completed.
    Connected,
    Message { destination: String, body: String },
    /// The peer reported an error at protocol level (e.g. a STOMP ERROR frame).
    ProtocolError(String),
    /// The socket failed to open or broke.
    SocketError(String),
    /// The socket closed.
    Disconnected,
}

/// Receiving side of a client's event stream.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// A live subscription, returned by [`TransportClient::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
}

/// How a fresh client behaves when its socket drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// `None`: report `Disconnected` and stop. `Some(d)`: wait `d` and reconnect.
    pub reconnect_delay: Option<Duration>,
}

impl ConnectPolicy {
    pub fn no_reconnect() -> Self {
        Self::default()
    }

    pub fn reconnect_after(delay: Duration) -> Self {
        Self {
            reconnect_delay: Some(delay),
        }
    }
}

/// A pub/sub client over one connection.
#[async_trait]
pub trait TransportClient: Send {
    /// Starts the connection in the background and returns its event stream.
    ///
    /// # Errors
    /// `ProviderError::Activation` for a malformed endpoint, an unsupported
    /// scheme, a missing runtime or a client that is already active.
    fn activate(&mut self) -> Result<TransportEvents>;

    /// Subscribes to `destination`. Subscriptions made before the handshake
    /// completes are sent once it does.
    fn subscribe(&mut self, destination: &str) -> Result<Subscription>;

    fn unsubscribe(&mut self, subscription: &Subscription) -> Result<()>;

    fn publish(&mut self, destination: &str, body: &str) -> Result<()>;

    /// Closes the connection and waits for the background task to exit.
    /// Idempotent.
    async fn deactivate(&mut self);

    fn is_active(&self) -> bool;
}

/// Factory for fresh, inactive clients bound to one endpoint.
pub trait TransportConnector: Send + Sync {
    fn connect(&self, policy: ConnectPolicy) -> Box<dyn TransportClient>;

    /// Endpoint the clients connect to, for logging.
    fn endpoint(&self) -> &str;
}

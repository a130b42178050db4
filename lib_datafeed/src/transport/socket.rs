//! # Socket Driver
//!
//! One background task per active client owns the WebSocket. It multiplexes
//! three inputs with `tokio::select!`: commands from the client handle,
//! frames from the peer, and the outgoing heart-beat schedule. The protocol
//! specific parts (handshake, framing, ping replies) are delegated to a
//! [`WireProtocol`].
//!
//! Subscriptions are remembered by the driver and replayed every time the
//! protocol reports `Connected`, so a reconnecting client resubscribes without
//! the provider noticing.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{ConnectPolicy, Subscription, TransportClient, TransportEvent, TransportEvents};
use crate::errors::{ProviderError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// How long `deactivate` waits for the driver to say goodbye before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A request from the client handle to its driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe { id: String, destination: String },
    Unsubscribe { id: String },
    Publish { destination: String, body: String },
}

/// What a protocol wants done after reading a frame.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProtocolOutput {
    pub events: Vec<TransportEvent>,
    /// Text frames to send back immediately (handshakes, pongs).
    pub replies: Vec<String>,
}

impl ProtocolOutput {
    pub fn event(event: TransportEvent) -> Self {
        Self {
            events: vec![event],
            replies: Vec::new(),
        }
    }

    pub fn reply(frame: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            replies: vec![frame.into()],
        }
    }
}

/// The protocol spoken over the WebSocket.
///
/// A fresh clone is handed to the driver on every activation; `on_open` is
/// called again after each reconnect and must reset per-connection state.
pub trait WireProtocol: Clone + Send + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Maps the configured URL to the socket endpoint, rejecting unusable ones.
    fn endpoint(&mut self, url: Url) -> std::result::Result<Url, String> {
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(format!("Unsupported scheme '{other}', expected ws or wss")),
        }
    }

    fn on_open(&mut self) -> ProtocolOutput;

    fn on_text(&mut self, text: &str) -> ProtocolOutput;

    /// Frames that carry out `command` on an established connection.
    fn encode(&mut self, command: &Command) -> Vec<String>;

    /// Outgoing heart-beat period and frame, once connected.
    fn heartbeat(&self) -> Option<(Duration, String)> {
        None
    }

    /// Longest the peer may stay silent before the connection counts as lost.
    fn silence_limit(&self) -> Option<Duration> {
        None
    }

    /// Frames sent before a deliberate close.
    fn on_close(&mut self) -> Vec<String> {
        Vec::new()
    }
}

enum SessionEnd {
    Shutdown,
    Lost,
}

struct Driver<P: WireProtocol> {
    endpoint: String,
    protocol: P,
    policy: ConnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: CancellationToken,
    /// Live subscriptions in the order they were made.
    subscriptions: Vec<(String, String)>,
    /// Publishes issued before the handshake completed.
    pending: Vec<Command>,
}

impl<P: WireProtocol> Driver<P> {
    async fn run(mut self) {
        loop {
            debug!(protocol = P::NAME, endpoint = %self.endpoint, "Connecting");
            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                attempt = connect_async(self.endpoint.as_str()) => attempt,
            };

            match attempt {
                Ok((stream, _)) => {
                    debug!(protocol = P::NAME, endpoint = %self.endpoint, "Socket open");
                    if let SessionEnd::Shutdown = self.session(stream).await {
                        return;
                    }
                }
                Err(e) => {
                    warn!(protocol = P::NAME, endpoint = %self.endpoint, error = %e, "Connection attempt failed");
                    self.emit(TransportEvent::SocketError(format!("WebSocket connection failed: {e}")));
                }
            }

            let Some(delay) = self.policy.reconnect_delay else {
                return;
            };
            info!(protocol = P::NAME, delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = time::sleep(delay) => {}
            }
        }
    }

    async fn session(&mut self, stream: WsStream) -> SessionEnd {
        let (mut write, mut read) = stream.split();
        let mut connected = false;
        let mut heartbeat: Option<String> = None;
        let mut ticker = time::interval(Duration::from_secs(3600));
        let mut last_activity = Instant::now();

        let opened = self.protocol.on_open();
        if let Err(e) = self.apply(opened, &mut write, &mut connected).await {
            return self.lost(format!("WebSocket send failed: {e}"));
        }

        loop {
            let silence_deadline = self.protocol.silence_limit().map(|limit| last_activity + limit);
            if connected && heartbeat.is_none() {
                if let Some((period, frame)) = self.protocol.heartbeat() {
                    ticker = time::interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    heartbeat = Some(frame);
                }
            }

            // Queued commands go out before the next read, so a subscription
            // made before an event arrives is in place when it is decoded.
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.close(&mut write).await;
                    return SessionEnd::Shutdown;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.close(&mut write).await;
                        return SessionEnd::Shutdown;
                    };
                    if let Err(e) = self.dispatch(command, connected, &mut write).await {
                        return self.lost(format!("WebSocket send failed: {e}"));
                    }
                }
                frame = read.next() => {
                    last_activity = Instant::now();
                    let output = match frame {
                        Some(Ok(Message::Text(text))) => {
                            trace!(protocol = P::NAME, bytes = text.len(), "Text frame");
                            self.protocol.on_text(text.as_str())
                        }
                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.protocol.on_text(text),
                            Err(_) => {
                                debug!(protocol = P::NAME, bytes = bytes.len(), "Dropping non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            info!(protocol = P::NAME, ?frame, "Socket closed by peer");
                            self.emit(TransportEvent::Disconnected);
                            return SessionEnd::Lost;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return self.lost(e.to_string()),
                        None => {
                            info!(protocol = P::NAME, "Socket stream ended");
                            self.emit(TransportEvent::Disconnected);
                            return SessionEnd::Lost;
                        }
                    };
                    if let Err(e) = self.apply(output, &mut write, &mut connected).await {
                        return self.lost(format!("WebSocket send failed: {e}"));
                    }
                }
                _ = ticker.tick(), if heartbeat.is_some() => {
                    let frame = heartbeat.clone().unwrap_or_default();
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        return self.lost(format!("Heart-beat failed: {e}"));
                    }
                }
                _ = sleep_until(silence_deadline), if silence_deadline.is_some() => {
                    warn!(protocol = P::NAME, "Peer silent past its heart-beat allowance");
                    return self.lost("Heart-beat timeout".to_string());
                }
            }
        }
    }

    /// Sends the protocol's replies and forwards its events, replaying
    /// subscriptions when the handshake completes.
    async fn apply(
        &mut self,
        output: ProtocolOutput,
        write: &mut WsSink,
        connected: &mut bool,
    ) -> std::result::Result<(), tungstenite::Error> {
        for reply in output.replies {
            write.send(Message::Text(reply.into())).await?;
        }
        for event in output.events {
            if event == TransportEvent::Connected {
                *connected = true;
                self.replay(write).await?;
            }
            self.emit(event);
        }
        Ok(())
    }

    async fn replay(&mut self, write: &mut WsSink) -> std::result::Result<(), tungstenite::Error> {
        let mut frames = Vec::new();
        for (id, destination) in &self.subscriptions {
            frames.extend(self.protocol.encode(&Command::Subscribe {
                id: id.clone(),
                destination: destination.clone(),
            }));
        }
        for command in self.pending.drain(..) {
            frames.extend(self.protocol.encode(&command));
        }
        if !self.subscriptions.is_empty() {
            debug!(protocol = P::NAME, count = self.subscriptions.len(), "Replaying subscriptions");
        }
        for frame in frames {
            write.send(Message::Text(frame.into())).await?;
        }
        Ok(())
    }

    async fn dispatch(
        &mut self,
        command: Command,
        connected: bool,
        write: &mut WsSink,
    ) -> std::result::Result<(), tungstenite::Error> {
        match &command {
            Command::Subscribe { id, destination } => {
                self.subscriptions.push((id.clone(), destination.clone()));
            }
            Command::Unsubscribe { id } => self.subscriptions.retain(|(sid, _)| sid != id),
            Command::Publish { .. } => {}
        }
        if !connected {
            if matches!(command, Command::Publish { .. }) {
                self.pending.push(command);
            }
            return Ok(());
        }
        for frame in self.protocol.encode(&command) {
            write.send(Message::Text(frame.into())).await?;
        }
        Ok(())
    }

    async fn close(&mut self, write: &mut WsSink) {
        for frame in self.protocol.on_close() {
            if write.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
        debug!(protocol = P::NAME, "Socket closed");
    }

    fn lost(&self, error: String) -> SessionEnd {
        warn!(protocol = P::NAME, %error, "Connection lost");
        self.emit(TransportEvent::SocketError(error));
        self.emit(TransportEvent::Disconnected);
        SessionEnd::Lost
    }

    fn emit(&self, event: TransportEvent) {
        // A dropped receiver means the owner is shutting down.
        let _ = self.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct ActiveSession {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// A [`TransportClient`] speaking protocol `P` over tokio-tungstenite.
pub struct SocketClient<P: WireProtocol> {
    url: String,
    protocol: P,
    policy: ConnectPolicy,
    next_subscription: u64,
    session: Option<ActiveSession>,
}

impl<P: WireProtocol> SocketClient<P> {
    pub fn new(url: impl Into<String>, protocol: P, policy: ConnectPolicy) -> Self {
        Self {
            url: url.into(),
            protocol,
            policy,
            next_subscription: 0,
            session: None,
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        match &self.session {
            Some(session) if !session.task.is_finished() => session
                .commands
                .send(command)
                .map_err(|_| ProviderError::NotConnected),
            _ => Err(ProviderError::NotConnected),
        }
    }
}

#[async_trait]
impl<P: WireProtocol> TransportClient for SocketClient<P> {
    fn activate(&mut self) -> Result<TransportEvents> {
        if self.is_active() {
            return Err(ProviderError::Activation("Client is already active".to_string()));
        }
        let url = Url::parse(&self.url)
            .map_err(|e| ProviderError::Activation(format!("Invalid URL '{}': {}", self.url, e)))?;
        let endpoint = self.protocol.endpoint(url).map_err(ProviderError::Activation)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProviderError::Activation(format!("No async runtime: {e}")))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let driver = Driver {
            endpoint: endpoint.to_string(),
            protocol: self.protocol.clone(),
            policy: self.policy,
            commands: command_rx,
            events: event_tx,
            shutdown: shutdown.clone(),
            subscriptions: Vec::new(),
            pending: Vec::new(),
        };
        let task = runtime.spawn(driver.run());
        self.session = Some(ActiveSession {
            commands: command_tx,
            shutdown,
            task,
        });
        Ok(event_rx)
    }

    fn subscribe(&mut self, destination: &str) -> Result<Subscription> {
        let id = format!("sub-{}", self.next_subscription);
        self.send(Command::Subscribe {
            id: id.clone(),
            destination: destination.to_string(),
        })?;
        self.next_subscription += 1;
        Ok(Subscription {
            id,
            destination: destination.to_string(),
        })
    }

    fn unsubscribe(&mut self, subscription: &Subscription) -> Result<()> {
        self.send(Command::Unsubscribe {
            id: subscription.id.clone(),
        })
    }

    fn publish(&mut self, destination: &str, body: &str) -> Result<()> {
        self.send(Command::Publish {
            destination: destination.to_string(),
            body: body.to_string(),
        })
    }

    async fn deactivate(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.shutdown.cancel();
        let abort = session.task.abort_handle();
        if time::timeout(SHUTDOWN_GRACE, session.task).await.is_err() {
            warn!(protocol = P::NAME, "Driver did not stop in time, aborting");
            abort.abort();
        }
    }

    fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.task.is_finished())
    }
}

impl<P: WireProtocol> Drop for SocketClient<P> {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.shutdown.cancel();
        }
    }
}

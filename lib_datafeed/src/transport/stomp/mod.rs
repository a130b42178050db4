//! # STOMP 1.2 over WebSocket
//!
//! Handshake is `CONNECT` → `CONNECTED`; the protocol reports `Connected`
//! only once the broker has answered. Heart-beats are negotiated from the
//! `heart-beat` headers of both sides: an EOL is sent on the agreed outgoing
//! schedule and the connection is dropped when the broker stays silent for
//! twice its agreed interval.

use std::time::Duration;

use tracing::{debug, trace, warn};
use url::Url;

use super::socket::{Command, ProtocolOutput, SocketClient, WireProtocol};
use super::{ConnectPolicy, TransportClient, TransportConnector, TransportEvent};

/// Frame codec.
pub mod frame;

pub use frame::{FrameError, StompFrame, decode_frames};

/// A STOMP client over tokio-tungstenite.
pub type StompClient = SocketClient<StompProtocol>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompOptions {
    /// Virtual host sent in `CONNECT`. Defaults to the URL's host.
    pub host: Option<String>,
    /// How often we offer to send heart-beats. Zero disables.
    pub heartbeat_outgoing: Duration,
    /// How often we want the broker's heart-beats. Zero disables.
    pub heartbeat_incoming: Duration,
}

impl Default for StompOptions {
    fn default() -> Self {
        Self {
            host: None,
            heartbeat_outgoing: Duration::from_secs(10),
            heartbeat_incoming: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StompProtocol {
    options: StompOptions,
    host: String,
    outgoing: Option<Duration>,
    incoming: Option<Duration>,
}

impl StompProtocol {
    pub fn new(options: StompOptions) -> Self {
        let host = options.host.clone().unwrap_or_else(|| "localhost".to_string());
        Self {
            options,
            host,
            outgoing: None,
            incoming: None,
        }
    }

    fn connect_frame(&self) -> StompFrame {
        StompFrame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", self.host.as_str())
            .header(
                "heart-beat",
                format!(
                    "{},{}",
                    self.options.heartbeat_outgoing.as_millis(),
                    self.options.heartbeat_incoming.as_millis()
                ),
            )
    }

    /// Applies the broker's `heart-beat: sx,sy` answer.
    fn negotiate(&mut self, server: Option<&str>) {
        let (sx, sy) = server.and_then(parse_heartbeat).unwrap_or((0, 0));
        let cx = self.options.heartbeat_outgoing.as_millis() as u64;
        let cy = self.options.heartbeat_incoming.as_millis() as u64;
        self.outgoing = agreed(cx, sy);
        self.incoming = agreed(sx, cy);
    }

    fn on_frame(&mut self, frame: StompFrame, output: &mut ProtocolOutput) {
        match frame.command.as_str() {
            "CONNECTED" => {
                self.negotiate(frame.get("heart-beat"));
                debug!(
                    version = frame.get("version").unwrap_or("1.0"),
                    outgoing_ms = self.outgoing.map(|d| d.as_millis() as u64),
                    incoming_ms = self.incoming.map(|d| d.as_millis() as u64),
                    "STOMP session established"
                );
                output.events.push(TransportEvent::Connected);
            }
            "MESSAGE" => {
                let destination = frame.get("destination").unwrap_or_default().to_string();
                output.events.push(TransportEvent::Message {
                    destination,
                    body: frame.body,
                });
            }
            "ERROR" => {
                let text = match frame.get("message") {
                    Some(message) => message.to_string(),
                    None => frame.body.trim().to_string(),
                };
                warn!(error = %text, "STOMP ERROR frame");
                output.events.push(TransportEvent::ProtocolError(text));
            }
            "RECEIPT" => trace!(receipt = frame.get("receipt-id"), "STOMP receipt"),
            other => debug!(command = other, "Ignoring unexpected STOMP frame"),
        }
    }
}

impl WireProtocol for StompProtocol {
    const NAME: &'static str = "stomp";

    fn endpoint(&mut self, url: Url) -> Result<Url, String> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(format!("Unsupported scheme '{other}', expected ws or wss")),
        }
        if self.options.host.is_none() {
            if let Some(host) = url.host_str() {
                self.host = host.to_string();
            }
        }
        Ok(url)
    }

    fn on_open(&mut self) -> ProtocolOutput {
        self.outgoing = None;
        self.incoming = None;
        ProtocolOutput::reply(self.connect_frame().encode())
    }

    fn on_text(&mut self, text: &str) -> ProtocolOutput {
        let mut output = ProtocolOutput::default();
        for frame in decode_frames(text) {
            self.on_frame(frame, &mut output);
        }
        output
    }

    fn encode(&mut self, command: &Command) -> Vec<String> {
        let frame = match command {
            Command::Subscribe { id, destination } => StompFrame::new("SUBSCRIBE")
                .header("id", id.as_str())
                .header("destination", destination.as_str())
                .header("ack", "auto"),
            Command::Unsubscribe { id } => StompFrame::new("UNSUBSCRIBE").header("id", id.as_str()),
            Command::Publish { destination, body } => StompFrame::new("SEND")
                .header("destination", destination.as_str())
                .header("content-length", body.len().to_string())
                .body(body.as_str()),
        };
        vec![frame.encode()]
    }

    fn heartbeat(&self) -> Option<(Duration, String)> {
        self.outgoing.map(|period| (period, "\n".to_string()))
    }

    fn silence_limit(&self) -> Option<Duration> {
        self.incoming.map(|period| period * 2)
    }

    fn on_close(&mut self) -> Vec<String> {
        vec![StompFrame::new("DISCONNECT").encode()]
    }
}

fn parse_heartbeat(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// One direction of the heart-beat agreement: off if either side says zero,
/// otherwise the slower of the two.
fn agreed(sender_ms: u64, receiver_ms: u64) -> Option<Duration> {
    if sender_ms == 0 || receiver_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(sender_ms.max(receiver_ms)))
    }
}

/// Builds [`StompClient`]s for one broker endpoint.
#[derive(Debug, Clone)]
pub struct StompConnector {
    url: String,
    options: StompOptions,
}

impl StompConnector {
    pub fn new(url: impl Into<String>, options: StompOptions) -> Self {
        Self {
            url: url.into(),
            options,
        }
    }
}

impl TransportConnector for StompConnector {
    fn connect(&self, policy: ConnectPolicy) -> Box<dyn TransportClient> {
        Box::new(StompClient::new(
            self.url.clone(),
            StompProtocol::new(self.options.clone()),
            policy,
        ))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

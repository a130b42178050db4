//! # Socket.IO over WebSocket
//!
//! Engine.IO v4 with the WebSocket transport only (no long-polling upgrade).
//! The server opens with `0{...}`; we answer with a namespace CONNECT and
//! report `Connected` when the server confirms it. Topics map to event names:
//! only events with a live subscription are forwarded. The server drives
//! liveness with PINGs which are answered immediately.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use super::socket::{Command, ProtocolOutput, SocketClient, WireProtocol};
use super::{ConnectPolicy, TransportClient, TransportConnector, TransportEvent};

/// Packet codec.
pub mod packet;

use packet::{EnginePacket, SocketPacket, decode_engine, decode_socket};

pub type SocketIoClient = SocketClient<SocketIoProtocol>;

#[derive(Debug, Clone)]
pub struct SocketIoProtocol {
    namespace: String,
    /// Subscription id -> event name.
    events: Vec<(String, String)>,
    silence: Option<Duration>,
}

impl SocketIoProtocol {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            events: Vec::new(),
            silence: None,
        }
    }

    fn is_subscribed(&self, name: &str) -> bool {
        self.events.iter().any(|(_, event)| event == name)
    }

    fn on_socket_packet(&mut self, packet: SocketPacket, output: &mut ProtocolOutput) {
        match packet {
            SocketPacket::Connect { namespace } if namespace == self.namespace => {
                debug!(%namespace, "Socket.IO namespace connected");
                output.events.push(TransportEvent::Connected);
            }
            SocketPacket::Disconnect { namespace } if namespace == self.namespace => {
                debug!(%namespace, "Socket.IO namespace disconnected by server");
                output.events.push(TransportEvent::Disconnected);
            }
            SocketPacket::ConnectError { namespace, message } => {
                warn!(%namespace, error = %message, "Socket.IO connect error");
                output.events.push(TransportEvent::ProtocolError(message));
            }
            SocketPacket::Event { namespace, name, args } if namespace == self.namespace => {
                if !self.is_subscribed(&name) {
                    trace!(event = %name, "Dropping event without subscription");
                    return;
                }
                output.events.push(TransportEvent::Message {
                    destination: name,
                    body: event_body(args),
                });
            }
            other => trace!(packet = ?other, "Ignoring Socket.IO packet"),
        }
    }
}

impl Default for SocketIoProtocol {
    fn default() -> Self {
        Self::new("/")
    }
}

/// A single argument is the body (strings verbatim); several become an array.
fn event_body(mut args: Vec<Value>) -> String {
    match args.len() {
        0 => Value::Null.to_string(),
        1 => match args.remove(0) {
            Value::String(text) => text,
            other => other.to_string(),
        },
        _ => Value::Array(args).to_string(),
    }
}

impl WireProtocol for SocketIoProtocol {
    const NAME: &'static str = "socketio";

    /// Accepts `http(s)` or `ws(s)` base URLs and points them at the
    /// Engine.IO WebSocket endpoint.
    fn endpoint(&mut self, mut url: Url) -> Result<Url, String> {
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => return Err(format!("Unsupported scheme '{other}', expected http(s) or ws(s)")),
        };
        url.set_scheme(scheme)
            .map_err(|_| format!("Cannot switch '{url}' to {scheme}"))?;
        if url.path().is_empty() || url.path() == "/" {
            url.set_path("/socket.io/");
        }
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }

    fn on_open(&mut self) -> ProtocolOutput {
        self.silence = None;
        ProtocolOutput::default()
    }

    fn on_text(&mut self, text: &str) -> ProtocolOutput {
        let mut output = ProtocolOutput::default();
        let packet = match decode_engine(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable Engine.IO packet");
                return output;
            }
        };
        match packet {
            EnginePacket::Open(info) => {
                debug!(sid = %info.sid, ping_interval = info.ping_interval, "Engine.IO open");
                if info.ping_interval > 0 {
                    self.silence = Some(Duration::from_millis(info.ping_interval + info.ping_timeout));
                }
                output.replies.push(packet::encode_connect(&self.namespace));
            }
            EnginePacket::Ping(payload) => output.replies.push(format!("3{payload}")),
            EnginePacket::Close => output.events.push(TransportEvent::Disconnected),
            EnginePacket::Message(inner) => match decode_socket(&inner) {
                Ok(packet) => self.on_socket_packet(packet, &mut output),
                Err(e) => warn!(error = %e, "Skipping undecodable Socket.IO packet"),
            },
            EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
        }
        output
    }

    fn encode(&mut self, command: &Command) -> Vec<String> {
        match command {
            Command::Subscribe { id, destination } => {
                if !self.events.iter().any(|(sid, _)| sid == id) {
                    self.events.push((id.clone(), destination.clone()));
                }
                Vec::new()
            }
            Command::Unsubscribe { id } => {
                self.events.retain(|(sid, _)| sid != id);
                Vec::new()
            }
            Command::Publish { destination, body } => {
                let payload = serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.clone()));
                vec![packet::encode_event(&self.namespace, destination, payload)]
            }
        }
    }

    fn silence_limit(&self) -> Option<Duration> {
        self.silence
    }

    fn on_close(&mut self) -> Vec<String> {
        vec![packet::encode_disconnect(&self.namespace)]
    }
}

#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    url: String,
    namespace: String,
}

impl SocketIoConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "/".to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

impl TransportConnector for SocketIoConnector {
    fn connect(&self, policy: ConnectPolicy) -> Box<dyn TransportClient> {
        Box::new(SocketIoClient::new(
            self.url.clone(),
            SocketIoProtocol::new(self.namespace.clone()),
            policy,
        ))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

//! Raw WebSocket transport: the socket opening is the handshake, every text
//! frame is a message, and there are no topics. Subscriptions are accepted
//! and ignored so the streaming provider can drive this transport like any
//! other.

use super::socket::{Command, ProtocolOutput, SocketClient, WireProtocol};
use super::{ConnectPolicy, TransportClient, TransportConnector, TransportEvent};

pub type WebSocketClient = SocketClient<RawProtocol>;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawProtocol;

impl WireProtocol for RawProtocol {
    const NAME: &'static str = "websocket";

    fn on_open(&mut self) -> ProtocolOutput {
        ProtocolOutput::event(TransportEvent::Connected)
    }

    fn on_text(&mut self, text: &str) -> ProtocolOutput {
        ProtocolOutput::event(TransportEvent::Message {
            destination: String::new(),
            body: text.to_string(),
        })
    }

    fn encode(&mut self, command: &Command) -> Vec<String> {
        match command {
            Command::Publish { body, .. } => vec![body.clone()],
            Command::Subscribe { .. } | Command::Unsubscribe { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl TransportConnector for WebSocketConnector {
    fn connect(&self, policy: ConnectPolicy) -> Box<dyn TransportClient> {
        Box::new(WebSocketClient::new(self.url.clone(), RawProtocol, policy))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_ignored_and_publish_is_the_body() {
        let mut raw = RawProtocol;
        assert!(raw
            .encode(&Command::Subscribe {
                id: "sub-0".into(),
                destination: "/topic/x".into()
            })
            .is_empty());
        assert_eq!(
            raw.encode(&Command::Publish {
                destination: "ignored".into(),
                body: "START".into()
            }),
            vec!["START".to_string()]
        );
    }

    #[test]
    fn open_is_connected_and_text_is_a_message() {
        let mut raw = RawProtocol;
        assert_eq!(raw.on_open().events, vec![TransportEvent::Connected]);
        assert_eq!(
            raw.on_text("{\"a\":1}").events,
            vec![TransportEvent::Message {
                destination: String::new(),
                body: "{\"a\":1}".into()
            }]
        );
    }
}

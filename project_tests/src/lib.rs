//! # Integration Test Harness
//!
//! Shared fixtures for the end-to-end suites under `tests/`:
//!
//! - [`ScriptedConnector`]: a transport that replays a fixed event script,
//!   recording every call the provider makes on it.
//! - [`serve_http_once`]: a one-shot HTTP/1.1 responder on a loopback port.
//! - [`rows_message`]: a JSON array body from row values.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lib_datafeed::transport::{
    ConnectPolicy, Subscription, TransportClient, TransportConnector, TransportEvent, TransportEvents,
};
use lib_datafeed::{ProviderError, Result};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Calls made on scripted clients, in order: `activate`, `subscribe:<dest>`,
/// `publish:<dest>:<body>`, `unsubscribe:<dest>`, `deactivate`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Hands out clients that emit `script` on activation.
///
/// With `hold_open` the event stream stays open until `deactivate`, so the
/// provider only ends through its own timers or a disconnect.
pub struct ScriptedConnector {
    script: Vec<TransportEvent>,
    hold_open: bool,
    calls: CallLog,
}

impl ScriptedConnector {
    pub fn new(script: Vec<TransportEvent>) -> Self {
        Self {
            script,
            hold_open: false,
            calls: CallLog::default(),
        }
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl TransportConnector for ScriptedConnector {
    fn connect(&self, _policy: ConnectPolicy) -> Box<dyn TransportClient> {
        Box::new(ScriptedClient {
            script: self.script.clone(),
            hold_open: self.hold_open,
            calls: self.calls.clone(),
            live: None,
            active: false,
            next_id: 0,
        })
    }

    fn endpoint(&self) -> &str {
        "scripted://test"
    }
}

struct ScriptedClient {
    script: Vec<TransportEvent>,
    hold_open: bool,
    calls: CallLog,
    live: Option<mpsc::UnboundedSender<TransportEvent>>,
    active: bool,
    next_id: u32,
}

impl ScriptedClient {
    fn record(&self, call: String) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl TransportClient for ScriptedClient {
    fn activate(&mut self) -> Result<TransportEvents> {
        if self.active {
            return Err(ProviderError::Activation("already active".into()));
        }
        self.record("activate".into());
        let (sender, events) = mpsc::unbounded_channel();
        for event in self.script.drain(..) {
            let _ = sender.send(event);
        }
        if self.hold_open {
            self.live = Some(sender);
        }
        self.active = true;
        Ok(events)
    }

    fn subscribe(&mut self, destination: &str) -> Result<Subscription> {
        if !self.active {
            return Err(ProviderError::NotConnected);
        }
        self.next_id += 1;
        self.record(format!("subscribe:{destination}"));
        Ok(Subscription {
            id: format!("sub-{}", self.next_id),
            destination: destination.to_string(),
        })
    }

    fn unsubscribe(&mut self, subscription: &Subscription) -> Result<()> {
        self.record(format!("unsubscribe:{}", subscription.destination));
        Ok(())
    }

    fn publish(&mut self, destination: &str, body: &str) -> Result<()> {
        self.record(format!("publish:{destination}:{body}"));
        Ok(())
    }

    async fn deactivate(&mut self) {
        if self.active {
            self.record("deactivate".into());
        }
        self.live = None;
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// A `Message` event carrying `rows` as a bare JSON array.
pub fn rows_message(rows: &[Value]) -> TransportEvent {
    TransportEvent::Message {
        destination: "/topic/rows".into(),
        body: Value::Array(rows.to_vec()).to_string(),
    }
}

/// A `Message` event carrying an arbitrary body.
pub fn text_message(body: &str) -> TransportEvent {
    TransportEvent::Message {
        destination: "/topic/rows".into(),
        body: body.to_string(),
    }
}

/// Answers the next `connections` HTTP requests with `status` and `body`,
/// then stops listening. Returns the bound address.
pub async fn serve_http_once(status: u16, body: String, connections: usize) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        for _ in 0..connections {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut request = vec![0_u8; 4096];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {status} Status\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    Ok(addr)
}

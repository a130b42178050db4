//! Engine.IO v4 and Socket.IO v5 packet codec.
//!
//! Engine.IO packets are a type digit followed by a payload. A Socket.IO
//! packet rides inside an Engine.IO `4` (message) packet as
//! `<type>[<namespace>,][<ack id>][<json>]`.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type '{0}'")]
    UnknownType(char),

    #[error("invalid packet payload: {0}")]
    Payload(String),
}

/// Handshake data carried by the Engine.IO OPEN packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect { namespace: String },
    Disconnect { namespace: String },
    Event { namespace: String, name: String, args: Vec<Value> },
    Ack { namespace: String, id: u64, args: Vec<Value> },
    ConnectError { namespace: String, message: String },
}

pub fn decode_engine(text: &str) -> Result<EnginePacket, PacketError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let payload = chars.as_str();
    Ok(match kind {
        '0' => EnginePacket::Open(
            serde_json::from_str(payload).map_err(|e| PacketError::Payload(e.to_string()))?,
        ),
        '1' => EnginePacket::Close,
        '2' => EnginePacket::Ping(payload.to_string()),
        '3' => EnginePacket::Pong(payload.to_string()),
        '4' => EnginePacket::Message(payload.to_string()),
        '5' => EnginePacket::Upgrade,
        '6' => EnginePacket::Noop,
        other => return Err(PacketError::UnknownType(other)),
    })
}

pub fn decode_socket(text: &str) -> Result<SocketPacket, PacketError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let mut rest = chars.as_str();

    let namespace = if rest.starts_with('/') {
        let (namespace, tail) = rest.split_once(',').unwrap_or((rest, ""));
        rest = tail;
        namespace.to_string()
    } else {
        "/".to_string()
    };

    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let ack_id = rest[..digits].parse::<u64>().ok();
    rest = &rest[digits..];

    let payload = || -> Result<Value, PacketError> {
        if rest.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(rest).map_err(|e| PacketError::Payload(e.to_string()))
    };

    Ok(match kind {
        '0' => SocketPacket::Connect { namespace },
        '1' => SocketPacket::Disconnect { namespace },
        '2' | '5' => {
            let mut args = match payload()? {
                Value::Array(args) => args,
                other => return Err(PacketError::Payload(format!("event payload is not an array: {other}"))),
            };
            if args.is_empty() {
                return Err(PacketError::Payload("event without a name".to_string()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                other => return Err(PacketError::Payload(format!("event name is not a string: {other}"))),
            };
            SocketPacket::Event { namespace, name, args }
        }
        '3' | '6' => {
            let args = match payload()? {
                Value::Array(args) => args,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            SocketPacket::Ack {
                namespace,
                id: ack_id.unwrap_or_default(),
                args,
            }
        }
        '4' => {
            let message = match payload()? {
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("connection refused")
                    .to_string(),
                Value::String(message) => message,
                _ => "connection refused".to_string(),
            };
            SocketPacket::ConnectError { namespace, message }
        }
        other => return Err(PacketError::UnknownType(other)),
    })
}

/// `40` or `40/ns,`.
pub fn encode_connect(namespace: &str) -> String {
    format!("40{}", namespace_prefix(namespace))
}

/// `41` or `41/ns,`.
pub fn encode_disconnect(namespace: &str) -> String {
    format!("41{}", namespace_prefix(namespace))
}

/// `42["name",payload]`, prefixed with the namespace when it is not `/`.
pub fn encode_event(namespace: &str, name: &str, payload: Value) -> String {
    let array = Value::Array(vec![Value::String(name.to_string()), payload]);
    format!("42{}{}", namespace_prefix(namespace), array)
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace.is_empty() || namespace == "/" {
        String::new()
    } else {
        format!("{namespace},")
    }
}

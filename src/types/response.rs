use std::error::Error as StdError;
use std::fmt;

use bon::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serde_helpers::{decode_data, null_as_default};
use crate::ws::WsError;

/// Event name carried by an inbound message.
///
/// The broker reserves a handful of `pusher:*` names for connection-level
/// signalling. Those that the connection consumes itself have their own variant;
/// every other name, including application events, lands in [`Event::Other`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Event {
    /// Handshake acknowledgement carrying the socket id
    #[serde(
        rename = "pusher:connection_established",
        alias = "connection_established"
    )]
    ConnectionEstablished,
    /// Broker-level error notification
    #[serde(rename = "pusher:error")]
    Error,
    /// Any other event, with its raw name
    #[serde(untagged)]
    Other(String),
}

impl Event {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionEstablished => "pusher:connection_established",
            Self::Error => "pusher:error",
            Self::Other(name) => name,
        }
    }

    /// Whether the event is consumed by the connection rather than routed to a channel.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        match name {
            "pusher:connection_established" | "connection_established" => {
                Self::ConnectionEstablished
            }
            "pusher:error" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        match Self::from(name.as_str()) {
            Self::Other(_) => Self::Other(name),
            reserved => reserved,
        }
    }
}

impl PartialEq<str> for Event {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Event {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Decoded unit of inbound traffic.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct Message {
    /// Event name
    #[builder(into)]
    pub event: Event,
    /// Channel the event was published on; empty for connection-level events
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    #[builder(into, default)]
    pub channel: String,
    /// Event payload, often a JSON document encoded as a string
    #[serde(default, skip_serializing_if = "Value::is_null")]
    #[builder(default)]
    pub data: Value,
}

impl Message {
    /// Decode the payload into `T`, accepting both string-encoded and inline JSON.
    pub fn data_as<T: DeserializeOwned>(&self) -> crate::Result<T> {
        decode_data(&self.data)
    }

    /// Whether the message belongs to the global channel.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.channel.is_empty()
    }
}

/// Payload of `pusher:connection_established`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionEstablished {
    /// Broker-assigned identifier of this socket
    pub socket_id: String,
    /// Seconds of inactivity after which the broker expects a ping
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

/// Payload of `pusher:error`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProtocolError {
    /// Human readable description
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    /// Broker error code, when one is supplied
    #[serde(default)]
    pub code: Option<u16>,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "broker error {code}: {}", self.message),
            None => write!(f, "broker error: {}", self.message),
        }
    }
}

impl StdError for ProtocolError {}

/// Deserialize messages from the byte slice.
///
/// Handles both single objects and arrays of messages.
/// Returns an empty vector for empty or whitespace-only input. Malformed input
/// fails with [`WsError::MessageParse`].
pub fn parse_messages(bytes: &[u8]) -> crate::Result<Vec<Message>> {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.first() == Some(&b'[') {
        Ok(serde_json::from_slice(trimmed).map_err(WsError::MessageParse)?)
    } else {
        let msg: Message = serde_json::from_slice(trimmed).map_err(WsError::MessageParse)?;
        Ok(vec![msg])
    }
}

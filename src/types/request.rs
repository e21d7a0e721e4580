use serde::Serialize;

/// Control message sent by the client to the broker.
///
/// Serializes to the adjacently tagged shape the broker expects, e.g.
/// `{"event":"pusher:subscribe","data":{"channel":"orders"}}`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ControlMessage {
    /// Ask the broker to start routing a channel's events to this connection
    #[serde(rename = "pusher:subscribe")]
    Subscribe {
        /// Channel name
        channel: String,
    },
    /// Keepalive
    #[serde(rename = "pusher:ping")]
    Ping,
}

impl ControlMessage {
    /// Create a subscribe request for `channel`.
    #[must_use]
    pub fn subscribe<S: Into<String>>(channel: S) -> Self {
        Self::Subscribe {
            channel: channel.into(),
        }
    }
}

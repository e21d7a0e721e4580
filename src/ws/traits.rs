//! Codec seam between the transport and dispatch.

use crate::types::response::{Message, parse_messages};

/// Message parser trait for converting raw frame bytes to messages.
///
/// The connection hands every text frame to its parser and dispatches the
/// returned messages in order. A parser error is treated as a recoverable
/// receive failure.
///
/// # Example
///
/// ```ignore
/// pub struct StrictParser;
///
/// impl MessageParser for StrictParser {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<Message>> {
///         Ok(vec![serde_json::from_slice(bytes)?])
///     }
/// }
/// ```
pub trait MessageParser: Send + Sync + 'static {
    /// Parse incoming bytes into messages.
    ///
    /// May return an empty vec for frames that carry no message.
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<Message>>;
}

/// Default JSON parser accepting single objects, arrays and blank keepalive frames.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl MessageParser for JsonParser {
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<Message>> {
        parse_messages(bytes)
    }
}

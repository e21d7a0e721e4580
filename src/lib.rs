#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod channel;
pub mod client;
pub mod error;
pub(crate) mod registry;
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

pub use channel::{Channel, Handler};
pub use client::Client;
pub use types::request::ControlMessage;
pub use types::response::{ConnectionEstablished, Event, Message, ProtocolError};
pub use ws::{Config, Connection, ConnectionState};

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broker host used when none is supplied.
pub const DEFAULT_HOST: &str = "ws://ws.pusherapp.com:80";

/// Protocol revision announced in the connection URL.
pub const PROTOCOL_VERSION: u8 = 7;

/// Name of the channel that receives broker-level events and messages without a channel.
pub const GLOBAL_CHANNEL: &str = "";

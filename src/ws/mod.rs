//! WebSocket connection management.
//!
//! # Architecture
//!
//! - [`Connection`]: owns the socket, the channel registry and two background tasks
//!   (receive/write loop and keepalive loop)
//! - [`MessageParser`]: codec turning frames into [`Message`](crate::Message)s
//!
//! # Example
//!
//! ```ignore
//! let connection = Connection::connect("app-key").await?;
//! let orders = connection.subscribe("orders")?;
//! orders.bind("order.created", |msg| println!("{:?}", msg.data));
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use config::Config;
pub use connection::{Connection, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;

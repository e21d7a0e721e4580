use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;

use crate::Result;
use crate::channel::Channel;
use crate::error::Error;
use crate::types::response::Message;
use crate::ws::WsError;
use crate::ws::config::Config;
use crate::ws::connection::{Connection, ConnectionState};

/// Pub/sub client over a single broker connection.
///
/// A cheap, cloneable handle: every clone shares the same [`Connection`], and the
/// connection closes when the last clone is dropped or [`disconnect`](Self::disconnect)
/// is called.
///
/// # Examples
///
/// ```rust, no_run
/// use futures::StreamExt as _;
/// use pusher_client::Client;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("app-key").await?;
///
///     client.bind("orders", "order.created", |msg| {
///         println!("created: {}", msg.data);
///     })?;
///
///     let mut updates = Box::pin(client.subscribe("orders")?);
///     while let Some(msg) = updates.next().await {
///         println!("{:?}", msg?);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Connection>,
}

impl Client {
    /// Connect to the default broker.
    pub async fn new(key: &str) -> Result<Self> {
        Ok(Self::from(Connection::connect(key).await?))
    }

    /// Connect to `host` with the given configuration.
    pub async fn with_config(host: &str, key: &str, config: Config) -> Result<Self> {
        Ok(Self::from(Connection::connect_with(host, key, config).await?))
    }

    /// Get the channel named `name`, subscribing on first use.
    pub fn channel(&self, name: &str) -> Result<Arc<Channel>> {
        self.inner.subscribe(name)
    }

    /// Bind `handler` to `event` on `channel`, subscribing to the channel if needed.
    pub fn bind<F>(&self, channel: &str, event: &str, handler: F) -> Result<()>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.subscribe(channel)?.bind(event, handler);
        Ok(())
    }

    /// Stream every message on `channel`, subscribing to the channel if needed.
    pub fn subscribe(&self, channel: &str) -> Result<impl Stream<Item = Result<Message>> + use<>> {
        Ok(self.inner.subscribe(channel)?.stream())
    }

    /// Stream broker `pusher:error` notifications as [`Kind::Protocol`](crate::error::Kind::Protocol)
    /// errors.
    ///
    /// A lagging consumer receives a [`WsError::Lagged`] error and keeps going.
    /// The stream ends when the connection is dropped.
    #[must_use]
    pub fn errors(&self) -> impl Stream<Item = Error> + use<> {
        let mut rx = self.inner.protocol_errors();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(error) => yield Error::from(error),
                    Err(RecvError::Lagged(n)) => yield Error::from(WsError::Lagged { count: n }),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Socket id assigned by the broker, once known.
    #[must_use]
    pub fn socket_id(&self) -> Option<String> {
        self.inner.socket_id()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Number of channels, including the global channel.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channel_count()
    }

    /// Close the connection. Safe to call more than once.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    /// Access the underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner
    }
}

impl From<Connection> for Client {
    fn from(connection: Connection) -> Self {
        Self {
            inner: Arc::new(connection),
        }
    }
}

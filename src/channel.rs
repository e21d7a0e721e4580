use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_stream::try_stream;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::Result;
use crate::types::response::Message;
use crate::ws::WsError;

/// Callback invoked for a message delivered to a channel.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync + 'static>;

/// A named subscription on a connection.
///
/// Channels are created by [`Connection::subscribe`](crate::ws::Connection::subscribe)
/// and owned by the connection's registry; callers hold shared handles. Messages
/// reach a channel in the order the broker sent them, and are delivered first to
/// handlers bound to the message's event, then to catch-all handlers, then to
/// every open [`stream`](Self::stream).
pub struct Channel {
    name: String,
    handlers: DashMap<String, Vec<Handler>>,
    catch_all: RwLock<Vec<Handler>>,
    broadcast_tx: broadcast::Sender<Message>,
}

impl Channel {
    pub(crate) fn new<S: Into<String>>(name: S, capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            handlers: DashMap::new(),
            catch_all: RwLock::new(Vec::new()),
            broadcast_tx,
        }
    }

    /// Channel name; empty for the global channel.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `handler` for every message on this channel whose event is `event`.
    pub fn bind<S, F>(&self, event: S, handler: F)
    where
        S: Into<String>,
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.handlers
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Run `handler` for every message on this channel regardless of event.
    pub fn bind_all<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.catch_all
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Remove every handler bound to `event`, returning how many were removed.
    pub fn unbind(&self, event: &str) -> usize {
        self.handlers
            .remove(event)
            .map_or(0, |(_, handlers)| handlers.len())
    }

    /// Number of handlers bound to `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, |entry| entry.len())
    }

    /// Stream every message delivered to this channel from now on.
    ///
    /// The stream ends once the connection and every handle to this channel are
    /// dropped. A consumer that falls more than the configured channel capacity
    /// behind receives [`WsError::Lagged`] as its final item.
    pub fn stream(&self) -> impl Stream<Item = Result<Message>> + use<> {
        let mut rx = self.broadcast_tx.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(msg) => yield msg,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Channel stream lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Deliver a message to this channel's handlers and streams.
    pub fn process_message(&self, message: Message) {
        // Clone the handler lists out so handlers may bind/unbind without deadlocking.
        let bound: Vec<Handler> = self
            .handlers
            .get(message.event.as_str())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        let catch_all: Vec<Handler> = self
            .catch_all
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        #[cfg(feature = "tracing")]
        tracing::trace!(
            channel = %self.name,
            event = %message.event,
            handlers = bound.len() + catch_all.len(),
            "Delivering message"
        );

        for handler in bound.iter().chain(&catch_all) {
            handler(&message);
        }

        // No receivers is not an error: streams are optional.
        _ = self.broadcast_tx.send(message);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("events", &self.handlers.len())
            .field("streams", &self.broadcast_tx.receiver_count())
            .finish_non_exhaustive()
    }
}

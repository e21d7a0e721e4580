#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt as _, StreamExt as _};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval_at, sleep};
use tokio_tungstenite::tungstenite::{Error as WsTransportError, Message as Frame};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::traits::{JsonParser, MessageParser};
use crate::channel::Channel;
use crate::registry::ChannelRegistry;
use crate::types::request::ControlMessage;
use crate::types::response::{ConnectionEstablished, Event, Message, ProtocolError};
use crate::{DEFAULT_HOST, Result, error::Error};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Frame>;
type WsSource = SplitStream<WsStream>;

/// Broadcast channel capacity for broker protocol errors.
const PROTOCOL_ERROR_CAPACITY: usize = 64;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket is open
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Socket has been closed, locally or by the broker
    Disconnected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Work for the task that owns the write half of the socket.
enum Command {
    Send(String),
    Close(oneshot::Sender<Result<()>>),
}

/// State shared between the handle and the background tasks.
struct Shared {
    /// Current state; doubles as the shutdown signal for both loops
    state_tx: watch::Sender<ConnectionState>,
    /// Outgoing frames, drained by the receive loop
    command_tx: mpsc::UnboundedSender<Command>,
    channels: ChannelRegistry,
    /// Payload of the last `pusher:connection_established`
    session: RwLock<Option<ConnectionEstablished>>,
    errors_tx: broadcast::Sender<ProtocolError>,
    retry_delay: Duration,
}

impl Shared {
    fn is_closed(&self) -> bool {
        !self.state_tx.borrow().is_connected()
    }

    /// Flip to [`ConnectionState::Disconnected`], waking both loops.
    fn mark_closed(&self) {
        self.state_tx.send_if_modified(|state| {
            if state.is_connected() {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.command_tx
            .send(Command::Send(json))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Handle reserved events and route everything else to its channel.
    fn dispatch(&self, message: Message) {
        match message.event {
            Event::ConnectionEstablished => match message.data_as::<ConnectionEstablished>() {
                Ok(established) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        socket_id = %established.socket_id,
                        activity_timeout = ?established.activity_timeout,
                        "Connection established"
                    );
                    *self
                        .session
                        .write()
                        .unwrap_or_else(PoisonError::into_inner) = Some(established);
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(data = %message.data, error = %e, "Malformed connection_established");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            },
            Event::Error => {
                let error = message
                    .data_as::<ProtocolError>()
                    .unwrap_or_else(|_e| ProtocolError {
                        message: message.data.to_string(),
                        code: None,
                    });
                #[cfg(feature = "tracing")]
                tracing::warn!(code = ?error.code, message = %error.message, "Broker reported an error");
                // No receivers is fine: the hook is optional.
                _ = self.errors_tx.send(error);
            }
            Event::Other(_) => {
                self.channels.dispatch(message);
            }
        }
    }
}

/// A live connection to the broker.
///
/// Owns the socket, the channel registry and two background tasks:
/// - a receive loop that decodes each frame and dispatches it to the matching
///   channel, and that also writes every outgoing frame, so writes never interleave
/// - a keepalive loop that enqueues a `pusher:ping` every
///   [`Config::keepalive_interval`]
///
/// Both tasks stop once the connection is [disconnected](Self::disconnect), the
/// broker closes the socket, or the handle is dropped.
///
/// # Example
///
/// ```no_run
/// use pusher_client::Connection;
///
/// # async fn example() -> pusher_client::Result<()> {
/// let connection = Connection::connect("app-key").await?;
/// let orders = connection.subscribe("orders")?;
/// orders.bind("order.created", |msg| {
///     println!("new order: {}", msg.data);
/// });
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    key: String,
    endpoint: String,
    shared: Arc<Shared>,
    /// Serializes concurrent `disconnect` calls
    disconnect_lock: Mutex<()>,
}

impl Connection {
    /// Connect to the default broker with the default configuration.
    pub async fn connect(key: &str) -> Result<Self> {
        Self::connect_with(DEFAULT_HOST, key, Config::default()).await
    }

    /// Connect to `host` (e.g. `ws://127.0.0.1:6001`) with the given configuration.
    pub async fn connect_with(host: &str, key: &str, config: Config) -> Result<Self> {
        Self::connect_with_parser(host, key, config, JsonParser).await
    }

    /// Connect using a custom frame parser.
    ///
    /// Dials before returning; on failure the error is returned and no background
    /// task is started. There is no retry at this layer.
    pub async fn connect_with_parser<P: MessageParser>(
        host: &str,
        key: &str,
        config: Config,
        parser: P,
    ) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::validation("identity key must not be empty"));
        }
        if config.keepalive_interval.is_zero() {
            return Err(Error::validation("keepalive interval must be non-zero"));
        }

        let endpoint = config.endpoint(host, key);
        Url::parse(&endpoint)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%endpoint, "Connecting to broker");

        let (ws_stream, _) = connect_async(endpoint.as_str()).await?;
        let (write, read) = ws_stream.split();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (errors_tx, _) = broadcast::channel(PROTOCOL_ERROR_CAPACITY);
        let state_tx = watch::Sender::new(ConnectionState::Connected {
            since: Instant::now(),
        });

        let shared = Arc::new(Shared {
            state_tx,
            command_tx,
            channels: ChannelRegistry::new(config.channel_capacity),
            session: RwLock::new(None),
            errors_tx,
            retry_delay: config.retry_delay,
        });

        tokio::spawn(receive_loop(
            Arc::clone(&shared),
            read,
            write,
            command_rx,
            parser,
        ));
        tokio::spawn(keepalive_loop(
            Arc::clone(&shared),
            config.keepalive_interval,
        ));

        Ok(Self {
            key: key.to_owned(),
            endpoint,
            shared,
            disconnect_lock: Mutex::new(()),
        })
    }

    /// Return the channel named `name`, subscribing to it on first use.
    ///
    /// The first call for a name sends exactly one `pusher:subscribe`; later
    /// calls return the same channel without touching the socket. The empty
    /// name is the global channel and is never subscribed.
    ///
    /// # Errors
    ///
    /// Fails with [`WsError::ConnectionClosed`] when asked for a new channel after
    /// the connection has closed. Existing channels are still returned.
    pub fn subscribe(&self, name: &str) -> Result<Arc<Channel>> {
        let (channel, created) = self.shared.channels.get_or_insert_with(name, || {
            if self.shared.is_closed() {
                return Err(WsError::ConnectionClosed.into());
            }
            self.shared.send(&ControlMessage::subscribe(name))
        })?;

        #[cfg(feature = "tracing")]
        if created {
            tracing::debug!(channel = %name, "Subscribed to channel");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = created;

        Ok(channel)
    }

    /// Look up an existing channel without subscribing.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.shared.channels.get(name)
    }

    /// Close the socket and stop the background tasks.
    ///
    /// Idempotent: once a call has succeeded, later calls return `Ok` without
    /// side effects. If the close handshake cannot be written the error is
    /// returned and the connection stays open, so the call may be retried.
    /// Once this returns `Ok` nothing further is written and no further
    /// message reaches a channel.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.disconnect_lock.lock().await;

        if self.shared.is_closed() {
            return Ok(());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.shared.command_tx.send(Command::Close(reply_tx)).is_ok() {
            // A dropped reply means the receive loop exited first; the socket is gone either way.
            if let Ok(result) = reply_rx.await {
                result?;
            }
        }

        self.shared.mark_closed();

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, "Disconnected");

        Ok(())
    }

    /// Identity key this connection was opened with.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Full endpoint URL that was dialed.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Socket id assigned by the broker, once the handshake event has arrived.
    #[must_use]
    pub fn socket_id(&self) -> Option<String> {
        self.session()
            .map(|established| established.socket_id)
    }

    /// Inactivity timeout advertised by the broker, if any.
    #[must_use]
    pub fn activity_timeout(&self) -> Option<Duration> {
        self.session()
            .and_then(|established| established.activity_timeout)
            .map(Duration::from_secs)
    }

    /// Receive broker `pusher:error` notifications.
    ///
    /// Errors reported before this is called are not replayed.
    #[must_use]
    pub fn protocol_errors(&self) -> broadcast::Receiver<ProtocolError> {
        self.shared.errors_tx.subscribe()
    }

    /// Channel names in subscription order, starting with the global channel.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.shared.channels.names()
    }

    /// Number of channels, including the global channel.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.shared.channels.len()
    }

    fn session(&self) -> Option<ConnectionEstablished> {
        self.shared
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Wakes both loops; they drop the socket halves on exit.
        self.shared.mark_closed();
    }
}

/// Marks the connection closed when the receive loop exits, including by unwinding
/// out of a panicking handler.
struct CloseOnExit(Arc<Shared>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        #[cfg(feature = "tracing")]
        if std::thread::panicking() {
            tracing::warn!("Receive loop panicked, closing connection");
        }

        self.0.mark_closed();
    }
}

/// Write a close frame and report the outcome to the waiting `disconnect`.
///
/// Returns `true` once the close frame has been written.
async fn close_sink<S>(write: &mut S, reply: oneshot::Sender<Result<()>>) -> bool
where
    S: Sink<Frame, Error = WsTransportError> + Unpin,
{
    let result = write.close().await.map_err(Error::from);
    let closed = result.is_ok();
    _ = reply.send(result);
    closed
}

/// Read, decode and dispatch frames; write queued frames.
///
/// A frame that fails to decode is logged and skipped after the configured
/// retry delay. A transport error, a close from the broker or the end of the
/// stream stops the loop and marks the connection closed, since the socket
/// yields nothing further after any of them.
async fn receive_loop<P: MessageParser>(
    shared: Arc<Shared>,
    mut read: WsSource,
    mut write: WsSink,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    parser: P,
) {
    let _close_on_exit = CloseOnExit(Arc::clone(&shared));
    let mut state_rx = shared.state_tx.subscribe();
    // Set once our close handshake has been written; later frames are discarded.
    let mut closing = false;

    loop {
        if !state_rx.borrow_and_update().is_connected() {
            break;
        }

        tokio::select! {
            biased;

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }

            Some(command) = command_rx.recv() => match command {
                Command::Send(text) => {
                    if closing {
                        continue;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::trace!(%text, "Sending WebSocket text message");

                    if let Err(e) = write.send(Frame::Text(text.into())).await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %e, "Failed to send WebSocket message");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                }
                Command::Close(reply) => {
                    closing |= close_sink(&mut write, reply).await;
                }
            },

            frame = read.next() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    if closing {
                        continue;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::trace!(text = %text.as_str(), "Received WebSocket text message");

                    match parser.parse(text.as_bytes()) {
                        Ok(messages) => {
                            for message in messages {
                                shared.dispatch(message);
                            }
                        }
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(text = %text.as_str(), error = %e, "Failed to parse WebSocket message");
                            #[cfg(not(feature = "tracing"))]
                            let _ = (&text, &e);
                            sleep(shared.retry_delay).await;
                        }
                    }
                }
                Some(Ok(Frame::Close(close_frame))) => {
                    #[cfg(feature = "tracing")]
                    if !closing {
                        tracing::debug!(frame = ?close_frame, "Broker closed the connection");
                    }
                    #[cfg(not(feature = "tracing"))]
                    let _ = &close_frame;
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary frames are not part of the protocol.
                }
                Some(Err(e)) => {
                    #[cfg(feature = "tracing")]
                    if !closing {
                        tracing::warn!(error = %e, "WebSocket receive error, closing connection");
                    }
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    break;
                }
                None => break,
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Receive loop stopped");
}

/// Enqueue a `pusher:ping` every `period` until the connection closes.
async fn keepalive_loop(shared: Arc<Shared>, period: Duration) {
    let mut state_rx = shared.state_tx.subscribe();
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let due = tokio::select! {
            _ = ticker.tick() => true,
            _ = state_rx.changed() => false,
        };

        if shared.is_closed() {
            break;
        }
        if !due {
            continue;
        }

        if shared.send(&ControlMessage::Ping).is_err() {
            break;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("Queued keepalive ping");
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Keepalive loop stopped");
}

#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the helpers"
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

pub const APP_KEY: &str = "app123";
pub const SOCKET_ID: &str = "123.456";

/// How long helpers wait for something that should happen.
pub const WAIT: Duration = Duration::from_secs(2);
/// How long helpers watch for something that should not happen.
pub const QUIET: Duration = Duration::from_millis(300);

#[derive(Clone, Debug)]
enum Outgoing {
    Text(String),
    Close,
    /// Drop the socket without a close handshake
    Reset,
}

/// What a client sent, in arrival order.
#[derive(Debug)]
enum Incoming {
    Text(String),
    Close,
}

/// Mock broker speaking just enough of the protocol for the client.
pub struct MockWsServer {
    pub addr: SocketAddr,
    /// Frames pushed to ALL connected clients
    outgoing_tx: broadcast::Sender<Outgoing>,
    /// Frames received from clients
    frames_rx: mpsc::UnboundedReceiver<Incoming>,
    /// Request URIs of accepted handshakes
    paths_rx: mpsc::UnboundedReceiver<String>,
}

impl MockWsServer {
    /// Start a broker that greets every client with `pusher:connection_established`.
    pub async fn start() -> Self {
        Self::start_with_welcome(Some(payloads::connection_established())).await
    }

    /// Start a broker on a random port, optionally greeting each client.
    pub async fn start_with_welcome(welcome: Option<Value>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (outgoing_tx, _) = broadcast::channel::<Outgoing>(100);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<Incoming>();
        let (paths_tx, paths_rx) = mpsc::unbounded_channel::<String>();

        let broadcast_tx = outgoing_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Subscribe before the handshake completes so nothing sent after
                // the client's connect returns can be missed.
                let mut outgoing_rx = broadcast_tx.subscribe();

                let path_tx = paths_tx.clone();
                let callback = move |request: &Request, response: Response| {
                    drop(path_tx.send(request.uri().to_string()));
                    Ok(response)
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let frame_tx = frames_tx.clone();
                let welcome = welcome.clone();

                tokio::spawn(async move {
                    if let Some(welcome) = welcome
                        && write
                            .send(Message::Text(welcome.to_string().into()))
                            .await
                            .is_err()
                    {
                        return;
                    }

                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(frame_tx.send(Incoming::Text(text.to_string())));
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        drop(frame_tx.send(Incoming::Close));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = outgoing_rx.recv() => {
                                match msg {
                                    Ok(Outgoing::Text(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Outgoing::Close) => {
                                        drop(write.send(Message::Close(None)).await);
                                    }
                                    Ok(Outgoing::Reset) => break,
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            outgoing_tx,
            frames_rx,
            paths_rx,
        }
    }

    /// Host URL to hand to the client.
    pub fn host(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send a text frame to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.outgoing_tx.send(Outgoing::Text(message.to_owned())));
    }

    /// Send a JSON frame to all connected clients.
    pub fn send_json(&self, message: &Value) {
        self.send(&message.to_string());
    }

    /// Close every client connection from the broker side.
    pub fn close_all(&self) {
        drop(self.outgoing_tx.send(Outgoing::Close));
    }

    /// Drop every client socket without a close handshake.
    pub fn reset_all(&self) {
        drop(self.outgoing_tx.send(Outgoing::Reset));
    }

    /// Request URI of the next accepted handshake.
    pub async fn recv_path(&mut self) -> Option<String> {
        timeout(WAIT, self.paths_rx.recv()).await.ok().flatten()
    }

    /// Next text frame from any client, decoded as JSON. Close frames are skipped.
    pub async fn recv_frame(&mut self) -> Option<Value> {
        loop {
            let incoming = timeout(WAIT, self.frames_rx.recv()).await.ok().flatten()?;
            if let Incoming::Text(text) = incoming {
                return Some(serde_json::from_str(&text).unwrap());
            }
        }
    }

    /// Next frame whose `event` is `event`, skipping others.
    pub async fn recv_event(&mut self, event: &str) -> Option<Value> {
        loop {
            let frame = self.recv_frame().await?;
            if frame["event"] == event {
                return Some(frame);
            }
        }
    }

    /// Collect every text frame received within `window`.
    pub async fn drain_frames(&mut self, window: Duration) -> Vec<Value> {
        let deadline = Instant::now() + window;
        let mut frames = Vec::new();
        while let Ok(Some(incoming)) = timeout_at(deadline, self.frames_rx.recv()).await {
            if let Incoming::Text(text) = incoming {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    /// Wait for a client close frame, discarding text frames sent before it.
    pub async fn recv_close(&mut self) -> Option<()> {
        loop {
            let incoming = timeout(WAIT, self.frames_rx.recv()).await.ok().flatten()?;
            if matches!(incoming, Incoming::Close) {
                return Some(());
            }
        }
    }
}

/// Frames whose event is `event`.
pub fn events_named<'frames>(frames: &'frames [Value], event: &str) -> Vec<&'frames Value> {
    frames.iter().filter(|frame| frame["event"] == event).collect()
}

/// Poll `check` until it returns true or [`WAIT`] elapses.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Example frames as a Pusher-protocol broker sends them.
pub mod payloads {
    use serde_json::{Value, json};

    use super::SOCKET_ID;

    #[must_use]
    pub fn connection_established() -> Value {
        json!({
            "event": "pusher:connection_established",
            "data": json!({ "socket_id": SOCKET_ID, "activity_timeout": 120 }).to_string()
        })
    }

    #[must_use]
    pub fn order_created(id: u64) -> Value {
        json!({
            "event": "order.created",
            "channel": "orders",
            "data": json!({ "id": id, "total": "19.99" }).to_string()
        })
    }

    #[must_use]
    pub fn event(event: &str, channel: &str, data: &Value) -> Value {
        json!({
            "event": event,
            "channel": channel,
            "data": data.to_string()
        })
    }

    #[must_use]
    pub fn protocol_error(code: u16, message: &str) -> Value {
        json!({
            "event": "pusher:error",
            "data": { "code": code, "message": message }
        })
    }

    #[must_use]
    pub fn pong() -> Value {
        json!({ "event": "pusher:pong", "data": "{}" })
    }
}

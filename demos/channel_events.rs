//! Channel event explorer.
//!
//! Connects to a broker and:
//! 1. Shows the connection state and socket id
//! 2. Binds a handler to one event on a channel
//! 3. Streams every message on the same channel for a while
//! 4. Reports broker errors and disconnects
//!
//! Run with tracing enabled:
//! ```sh
//! PUSHER_KEY=app-key PUSHER_HOST=ws://127.0.0.1:6001 RUST_LOG=info \
//!     cargo run --example channel_events
//! ```

use std::env;
use std::time::Duration;

use futures::StreamExt as _;
use pusher_client::{Client, Config, DEFAULT_HOST};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let key = env::var("PUSHER_KEY")?;
    let host = env::var("PUSHER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_owned());
    let channel = env::var("PUSHER_CHANNEL").unwrap_or_else(|_| "test_channel".to_owned());
    let event = env::var("PUSHER_EVENT").unwrap_or_else(|_| "my_event".to_owned());

    let config = Config::builder()
        .keepalive_interval(Duration::from_secs(30))
        .build();
    let client = Client::with_config(&host, &key, config).await?;

    info!(endpoint = client.connection().endpoint(), state = ?client.connection_state());

    // The handshake event arrives shortly after connecting.
    sleep(Duration::from_millis(500)).await;
    info!(socket_id = ?client.socket_id());

    let errors = client.errors();
    tokio::spawn(async move {
        let mut errors = Box::pin(errors);
        while let Some(e) = errors.next().await {
            warn!(stream = "errors", error = %e);
        }
    });

    let bound_event = event.clone();
    client.bind(&channel, &event, move |msg| {
        info!(handler = %bound_event, channel = %msg.channel, data = %msg.data);
    })?;

    info!(stream = %channel, "Streaming channel messages");
    let mut stream = Box::pin(client.subscribe(&channel)?);
    let mut count = 0;

    while let Ok(Some(result)) = timeout(Duration::from_secs(30), stream.next()).await {
        match result {
            Ok(msg) => {
                info!(stream = %channel, event = %msg.event, data = %msg.data);
                count += 1;
                if count >= 10 {
                    break;
                }
            }
            Err(e) => debug!(stream = %channel, error = %e),
        }
    }
    info!(stream = %channel, received = count);

    info!(channels = ?client.connection().channel_names(), count = client.channel_count());

    client.disconnect().await?;
    info!(state = ?client.connection_state());

    Ok(())
}

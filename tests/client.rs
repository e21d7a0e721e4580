#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{APP_KEY, MockWsServer, QUIET, WAIT, eventually, events_named, payloads};
use futures_util::StreamExt as _;
use pusher_client::error::Kind;
use pusher_client::{Client, Config, ProtocolError};
use serde_json::json;
use tokio::time::timeout;

async fn client(server: &MockWsServer) -> Client {
    Client::with_config(&server.host(), APP_KEY, Config::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn bind_subscribes_and_fires_handler() {
    let mut server = MockWsServer::start().await;
    let client = client(&server).await;
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    client
        .bind("orders", "order.created", move |msg| {
            assert_eq!(msg.channel, "orders");
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let frame = server.recv_event("pusher:subscribe").await.unwrap();
    assert_eq!(frame["data"]["channel"], "orders");

    server.send_json(&payloads::order_created(1));
    server.send_json(&payloads::event("order.cancelled", "orders", &json!({})));

    assert!(eventually(|| hits.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn subscribe_streams_channel_messages() {
    let server = MockWsServer::start().await;
    let client = client(&server).await;
    let mut updates = Box::pin(client.subscribe("orders").unwrap());

    server.send_json(&payloads::order_created(1));
    server.send_json(&payloads::event("order.shipped", "orders", &json!({ "id": 1 })));

    let first = timeout(WAIT, updates.next()).await.unwrap().unwrap().unwrap();
    let second = timeout(WAIT, updates.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.event, "order.created");
    assert_eq!(second.event, "order.shipped");
}

#[tokio::test]
async fn bind_and_subscribe_share_one_subscription() {
    let mut server = MockWsServer::start().await;
    let client = client(&server).await;

    client.bind("orders", "order.created", |_| {}).unwrap();
    let _updates = client.subscribe("orders").unwrap();
    let channel = client.channel("orders").unwrap();

    assert_eq!(channel.handler_count("order.created"), 1);
    let frames = server.drain_frames(QUIET).await;
    assert_eq!(events_named(&frames, "pusher:subscribe").len(), 1);
}

#[tokio::test]
async fn errors_surface_broker_errors() {
    let server = MockWsServer::start().await;
    let client = client(&server).await;
    let mut errors = Box::pin(client.errors());

    server.send_json(&payloads::protocol_error(4004, "Over capacity"));

    let err = timeout(WAIT, errors.next()).await.unwrap().unwrap();
    assert_eq!(err.kind(), Kind::Protocol);
    let protocol = err.downcast_ref::<ProtocolError>().unwrap();
    assert_eq!(protocol.code, Some(4004));
    assert_eq!(protocol.message, "Over capacity");
}

#[tokio::test]
async fn clones_share_the_connection() {
    let server = MockWsServer::start().await;
    let client = client(&server).await;
    let clone = client.clone();

    clone.channel("orders").unwrap();

    assert_eq!(client.channel_count(), 2);
    assert!(eventually(|| client.socket_id().is_some()).await);
    assert_eq!(clone.socket_id(), client.socket_id());
}

#[tokio::test]
async fn disconnect_through_any_clone_closes_all() {
    let mut server = MockWsServer::start().await;
    let client = client(&server).await;
    let clone = client.clone();

    clone.disconnect().await.unwrap();

    assert!(!client.connection_state().is_connected());
    assert!(server.recv_close().await.is_some());
    client.disconnect().await.unwrap();

    let err = client.channel("orders").unwrap_err();
    assert_eq!(err.kind(), Kind::WebSocket);
}

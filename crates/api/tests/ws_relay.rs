//! Live WebSocket clients against a served app.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn subscribe(addr: SocketAddr, subject_id: &str) -> Client {
    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let frame = json!({"event": "subscribe:subject", "data": subject_id});
    client.send(Message::Text(frame.to_string())).await.unwrap();
    client
}

async fn wait_for_members(app: &TestApp, group: &str, expected: usize) {
    let manager = app.app.state.ws_manager.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.group_size(group).await != expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("group membership");
}

/// Next JSON text frame, skipping control frames.
async fn next_frame(client: &mut Client, wait: Duration) -> Option<Value> {
    tokio::time::timeout(wait, async {
        while let Some(message) = client.next().await {
            if let Message::Text(text) = message.ok()? {
                return serde_json::from_str(&text).ok();
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

// ---------------------------------------------------------------------------
// Test: subscribers only see their own subject
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subject_subscribers_receive_only_their_events() {
    let app = TestApp::new();
    let addr = serve(&app).await;

    let mut t1 = subscribe(addr, "t1").await;
    let mut t2 = subscribe(addr, "t2").await;
    wait_for_members(&app, "subject:t1", 1).await;
    wait_for_members(&app, "subject:t2", 1).await;

    app.post("/download", json!({"subjectId": "t1", "sourceRef": "https://x/t1"}))
        .await;

    let mut events = Vec::new();
    while let Some(frame) = next_frame(&mut t1, Duration::from_secs(5)).await {
        assert_eq!(frame["data"]["subjectId"], "t1", "frame: {frame}");
        let event = frame["event"].as_str().unwrap().to_string();
        let done = event == "download:job:completed";
        events.push(event);
        if done {
            break;
        }
    }
    assert_eq!(events.first().map(String::as_str), Some("download:job:created"));
    assert_eq!(events.last().map(String::as_str), Some("download:job:completed"));

    assert!(next_frame(&mut t2, Duration::from_millis(300)).await.is_none());
}

// ---------------------------------------------------------------------------
// Test: direct notifications and unsubscribe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notify_reaches_subscribers_until_they_leave() {
    let app = TestApp::new();
    let addr = serve(&app).await;

    let mut client = subscribe(addr, "t1").await;
    wait_for_members(&app, "subject:t1", 1).await;

    app.post(
        "/notify",
        json!({"event": "separate:started", "data": {"subjectId": "t1", "message": "hi"}}),
    )
    .await;
    let frame = next_frame(&mut client, Duration::from_secs(5)).await.unwrap();
    assert_eq!(frame["event"], "separate:started");
    assert_eq!(frame["data"]["message"], "hi");

    let leave = json!({"event": "unsubscribe:subject", "data": "t1"});
    client.send(Message::Text(leave.to_string())).await.unwrap();
    wait_for_members(&app, "subject:t1", 0).await;

    app.post(
        "/notify",
        json!({"event": "separate:started", "data": {"subjectId": "t1"}}),
    )
    .await;
    assert!(next_frame(&mut client, Duration::from_millis(300)).await.is_none());
}

// ---------------------------------------------------------------------------
// Test: disconnect drops membership
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_leaves_all_groups() {
    let app = TestApp::new();
    let addr = serve(&app).await;

    let mut client = subscribe(addr, "t1").await;
    wait_for_members(&app, "subject:t1", 1).await;

    client.close(None).await.unwrap();
    wait_for_members(&app, "subject:t1", 0).await;
    assert_eq!(app.app.state.ws_manager.connection_count().await, 0);
}

//! Unit tests for `WsManager`, without any HTTP upgrades.

use axum::extract::ws::Message;
use stemflow_api::ws::WsManager;

// ---------------------------------------------------------------------------
// Test: add/remove bookkeeping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_and_remove_track_connection_count() {
    let manager = WsManager::new();
    assert_eq!(manager.connection_count().await, 0);

    let _rx = manager.add("conn-1".to_string()).await;
    assert_eq!(manager.connection_count().await, 1);

    manager.remove("nonexistent").await;
    assert_eq!(manager.connection_count().await, 1);

    manager.remove("conn-1").await;
    assert_eq!(manager.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: group delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_group_reaches_members_only() {
    let manager = WsManager::new();
    let mut rx1 = manager.add("conn-1".to_string()).await;
    let mut rx2 = manager.add("conn-2".to_string()).await;

    assert!(manager.join("conn-1", "subject:t1").await);
    assert!(manager.join("conn-2", "subject:t2").await);

    let sent = manager
        .send_to_group("subject:t1", Message::Text("hello".into()))
        .await;
    assert_eq!(sent, 1);
    assert!(matches!(rx1.try_recv(), Ok(Message::Text(t)) if t.as_str() == "hello"));
    assert!(rx2.try_recv().is_err());
}

#[tokio::test]
async fn join_unknown_connection_is_refused() {
    let manager = WsManager::new();
    assert!(!manager.join("ghost", "subject:t1").await);
    assert_eq!(manager.group_size("subject:t1").await, 0);
}

#[tokio::test]
async fn leave_stops_delivery() {
    let manager = WsManager::new();
    let mut rx = manager.add("conn-1".to_string()).await;
    manager.join("conn-1", "subject:t1").await;

    assert!(manager.leave("conn-1", "subject:t1").await);
    assert!(!manager.leave("conn-1", "subject:t1").await);

    let sent = manager
        .send_to_group("subject:t1", Message::Text("x".into()))
        .await;
    assert_eq!(sent, 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn remove_drops_group_membership() {
    let manager = WsManager::new();
    let _rx = manager.add("conn-1".to_string()).await;
    manager.join("conn-1", "subject:t1").await;
    manager.join("conn-1", "subject:t2").await;

    manager.remove("conn-1").await;

    assert_eq!(manager.group_size("subject:t1").await, 0);
    assert_eq!(manager.group_size("subject:t2").await, 0);
}

// ---------------------------------------------------------------------------
// Test: ping and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_reaches_everyone() {
    let manager = WsManager::new();
    let mut rx1 = manager.add("conn-1".to_string()).await;
    let mut rx2 = manager.add("conn-2".to_string()).await;

    manager.ping_all().await;

    for rx in [&mut rx1, &mut rx2] {
        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
    }
}

#[tokio::test]
async fn shutdown_all_sends_close_and_clears() {
    let manager = WsManager::new();
    let mut rx1 = manager.add("conn-1".to_string()).await;
    let mut rx2 = manager.add("conn-2".to_string()).await;
    manager.join("conn-1", "subject:t1").await;

    manager.shutdown_all().await;

    assert_eq!(manager.connection_count().await, 0);
    assert_eq!(manager.group_size("subject:t1").await, 0);
    assert!(matches!(rx1.try_recv(), Ok(Message::Close(None))));
    assert!(matches!(rx2.try_recv(), Ok(Message::Close(None))));
}

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use stemflow_core::job_events::{subject_group, SUBSCRIBE_EVENT, UNSUBSCRIBE_EVENT};
use stemflow_core::subject::validate_subject_id;

use crate::state::AppState;
use crate::ws::manager::WsManager;

/// Inbound `{ "event": ..., "data": ... }` frame.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.ws_manager))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager`.
///   2. Spawns a sender task that forwards messages from the manager channel.
///   3. Processes subscribe/unsubscribe frames on the current task.
///   4. Cleans up on disconnect, which also drops group memberships.
async fn handle_socket(socket: WebSocket, ws_manager: Arc<WsManager>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = ws_manager.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(Message::Text(text)) => handle_frame(&ws_manager, &conn_id, text.as_str()).await,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Apply one inbound text frame. Malformed frames are logged and ignored.
async fn handle_frame(ws_manager: &WsManager, conn_id: &str, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(conn_id, error = %e, "Ignoring malformed frame");
            return;
        }
    };

    let subject_id = match frame.data.as_str() {
        Some(id) => id,
        None => {
            tracing::debug!(conn_id, event = %frame.event, "Frame data is not a subject id");
            return;
        }
    };
    if let Err(e) = validate_subject_id(subject_id) {
        tracing::debug!(conn_id, error = %e, "Ignoring invalid subject id");
        return;
    }

    let group = subject_group(subject_id);
    match frame.event.as_str() {
        SUBSCRIBE_EVENT => {
            ws_manager.join(conn_id, &group).await;
            tracing::debug!(conn_id, subject_id, "Subscribed to subject");
        }
        UNSUBSCRIBE_EVENT => {
            ws_manager.leave(conn_id, &group).await;
            tracing::debug!(conn_id, subject_id, "Unsubscribed from subject");
        }
        other => tracing::debug!(conn_id, event = other, "Unknown client event"),
    }
}

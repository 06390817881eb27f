//! The two broadcast streams: metrics snapshots (throttled, 100ms floor) and
//! simulation lifecycle notifications. Both forward an `EventHub`/`ThrottledHub`
//! subscription onto an upgraded WebSocket as JSON text frames; a send error
//! (the usual symptom of a stale, unresponsive client) ends the connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;

use crate::notify::NotificationEvent;
use crate::state::AppState;

pub async fn metrics_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_metrics_socket(socket, state))
}

async fn handle_metrics_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (sub_id, mut rx) = state.metrics_hub.subscribe(8);
    while let Some(snapshot) = rx.recv().await {
        let Ok(text) = serde_json::to_string(&snapshot) else { continue };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    state.metrics_hub.unsubscribe(sub_id);
}

pub async fn notifications_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_notifications_socket(socket, state))
}

async fn handle_notifications_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (sub_id, mut rx) = state.notify_hub.subscribe(32);
    state.notify_hub.publish(NotificationEvent::Joined);

    loop {
        tokio::select! {
            biased;
            maybe_msg = socket.recv() => {
                if maybe_msg.is_none() {
                    break;
                }
            }
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.notify_hub.unsubscribe(sub_id);
    state.notify_hub.publish(NotificationEvent::Left);
}

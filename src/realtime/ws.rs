//! WebSocket endpoint for the realtime channel.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::RealtimeEvent;
use super::registry::{SessionHandle, SessionRegistry};

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    viewer_id: Option<String>,
}

/// Router exposing `GET /ws?viewer_id=...`.
pub fn realtime_routes(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(registry)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(registry): State<Arc<SessionRegistry>>,
) -> impl IntoResponse {
    let viewer_id = params
        .viewer_id
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| format!("anon-{}", Uuid::new_v4()));
    info!(viewer_id = %viewer_id, "Realtime viewer connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, viewer_id, registry))
}

async fn handle_socket(mut socket: WebSocket, viewer_id: String, registry: Arc<SessionRegistry>) {
    let (handle, mut rx) = SessionHandle::channel();
    let connection_id = handle.connection_id;

    // Register before acking so events emitted after the ack are delivered.
    registry.register(&viewer_id, handle).await;

    let ack = RealtimeEvent::Connected {
        viewer_id: viewer_id.clone(),
        connection_id,
    };
    if !send_event(&mut socket, &ack).await {
        warn!(viewer_id = %viewer_id, "Failed to send connect ack, client disconnected");
        registry.unregister_connection(&viewer_id, connection_id).await;
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if !send_event(&mut socket, &event).await {
                            debug!(viewer_id = %viewer_id, "Client disconnected during send");
                            break;
                        }
                    }
                    // Registry dropped our sender: a newer session replaced this one.
                    None => {
                        debug!(viewer_id = %viewer_id, "Session replaced, closing socket");
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(viewer_id = %viewer_id, text = %text.as_str(), "Ignoring client frame");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(viewer_id = %viewer_id, "Realtime viewer disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(viewer_id = %viewer_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    registry.unregister_connection(&viewer_id, connection_id).await;
}

async fn send_event(socket: &mut WebSocket, event: &RealtimeEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(event = event.name(), error = %e, "Failed to serialize realtime event");
            true
        }
    }
}

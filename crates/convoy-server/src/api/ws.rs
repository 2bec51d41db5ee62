//! WebSocket stream of convoy events.
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    /// Only forward events for this convoy (fleet-wide events always pass)
    convoy_id: Option<String>,
}

/// Handler for WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsQuery>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.convoy_id))
        .into_response()
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, convoy_filter: Option<String>) {
    let mut rx = state.subscribe();
    tracing::debug!(convoy_filter = ?convoy_filter, "Stream client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(msg) => {
                        if let (Some(wanted), Some(scope)) = (convoy_filter.as_deref(), msg.convoy_id.as_deref()) {
                            if wanted != scope {
                                continue;
                            }
                        }
                        if socket.send(Message::Text(msg.payload.as_ref().to_owned())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Stream client lagging, dropped events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    tracing::debug!("Stream client disconnected");
}

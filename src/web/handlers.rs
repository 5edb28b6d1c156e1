//! HTTP request handlers.

use super::AppState;
use crate::model::CheckResult;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use tokio::sync::broadcast;

/// GET /monitors — status snapshots for every configured target.
pub async fn handle_monitors(State(state): State<AppState>) -> impl IntoResponse {
    let snapshots: Vec<_> = state
        .engine
        .targets()
        .iter()
        .map(|target| state.engine.status(&target.id))
        .collect();

    Json(snapshots)
}

/// GET /monitor/{id} — status snapshot for one target.
pub async fn handle_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.engine.target(&id).is_none() {
        return not_found(&id);
    }

    Json(state.engine.status(&id)).into_response()
}

/// GET /monitor/{id}/history — all retained results for one target.
pub async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.engine.target(&id).is_none() {
        return not_found(&id);
    }

    Json(state.engine.history(&id)).into_response()
}

fn not_found(id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Monitor with ID '{id}' not found") })),
    )
        .into_response()
}

/// GET /realtime/ — websocket feed of every processed result.
pub async fn handle_realtime(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let rx = state.realtime_tx.subscribe();
    ws.on_upgrade(move |socket| realtime_session(socket, rx))
}

async fn realtime_session(mut socket: WebSocket, mut rx: broadcast::Receiver<CheckResult>) {
    tracing::info!("Realtime subscriber connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    // Inbound messages carry no meaning on this feed.
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => break,
                }
            }
            result = rx.recv() => {
                match result {
                    Ok(check) => {
                        let Ok(payload) = serde_json::to_string(&check) else {
                            continue;
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Realtime subscriber lagging, dropped {skipped} results");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("Realtime subscriber disconnected");
}

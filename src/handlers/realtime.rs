use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;

use super::AppState;
use crate::auth::authenticate;
use crate::errors::AppError;
use crate::events::UserSubscription;

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    pub token: Option<String>,
}

/// GET /api/v1/realtime?token=...
///
/// Browsers cannot set headers on a WebSocket handshake, so the API token
/// travels as a query parameter and is checked before upgrading.
pub async fn realtime(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RealtimeParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = params
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;
    let user = authenticate(&state.storage, token).await?;

    let subscription = state.events.subscribe(user.id);
    tracing::info!("Realtime client connected for user {}", user.id);
    Ok(ws.on_upgrade(move |socket| forward_events(socket, subscription)))
}

async fn forward_events(mut socket: WebSocket, mut subscription: UserSubscription) {
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Realtime socket error: {}", e);
                    break;
                }
            },
            event = subscription.recv() => match event {
                Some(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("Failed to serialize realtime event: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    tracing::info!("Realtime client disconnected");
}

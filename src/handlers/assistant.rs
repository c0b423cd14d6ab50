use axum::{extract::State, Extension, Json};
use std::sync::Arc;

use super::{require_text, AppState};
use crate::assistant::{run_chat, StorageToolExecutor};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{AssistantChatRequest, AssistantChatResponse};

/// Turns of history forwarded to the model.
const MAX_HISTORY: usize = 20;

/// POST /api/v1/assistant/chat
///
/// Answers questions about the business's own data. The model may call
/// tools (search, orders, payments, sales) several times before answering.
///
/// # Returns
///
/// * `AssistantChatResponse` - the reply and the tool calls made for it.
/// * 503 when no model key is configured.
#[utoipa::path(
    post,
    path = "/api/v1/assistant/chat",
    request_body = AssistantChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = AssistantChatResponse),
        (status = 503, description = "Assistant not configured")
    ),
    tag = "assistant"
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<AssistantChatRequest>,
) -> Result<Json<AssistantChatResponse>, AppError> {
    let client = state.assistant()?;
    let message = require_text(&req.message, "message")?;

    let history_start = req.history.len().saturating_sub(MAX_HISTORY);
    let executor = StorageToolExecutor {
        storage: state.storage.clone(),
        user_id: user.id(),
        events: state.events.clone(),
    };

    let response = run_chat(
        client,
        &executor,
        &user.0.business_name,
        &req.history[history_start..],
        message,
    )
    .await?;

    tracing::info!(
        "Assistant answered for user {} with {} tool call(s)",
        user.id(),
        response.tool_calls.len()
    );
    Ok(Json(response))
}

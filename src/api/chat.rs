//! Chat completion endpoint

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::post,
};
use serde::Deserialize;

use super::voice::TextResponse;
use super::{ApiError, GatewayState};
use crate::transcript::{ChatMessage, Turn};

/// Message shown to clients when the chat provider fails; the cause is logged
pub const CHAT_UNAVAILABLE: &str = "Chat is currently unavailable";

/// Build chat router
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .with_state(state)
}

/// Chat request: the conversation so far, oldest first
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

async fn chat(
    State(state): State<Arc<GatewayState>>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<TextResponse>, ApiError> {
    let Json(request) = request?;
    complete_messages(&state, request.messages).await.map(Json)
}

pub(super) async fn complete_messages(
    state: &GatewayState,
    messages: Vec<ChatMessage>,
) -> Result<TextResponse, ApiError> {
    let history: Vec<Turn> = messages.into_iter().map(Turn::from).collect();
    tracing::debug!(turns = history.len(), "chat request");

    let text = state.conversation.complete(&history).await.map_err(|e| {
        tracing::error!(error = %e, "chat completion failed");
        ApiError::Upstream(CHAT_UNAVAILABLE.to_string())
    })?;

    Ok(TextResponse { text })
}

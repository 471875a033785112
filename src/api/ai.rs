//! Combined endpoint: one route for all three stages
//!
//! A multipart body is transcribed. A JSON body selects the stage with its
//! `action` field: `"chat"` with `messages`, or `"tts"` with `text`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, Multipart, Request, State},
    http::header,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;

use super::{ApiError, GatewayState, chat, voice};
use crate::transcript::ChatMessage;

/// Build combined router
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new().route("/api/ai", post(ai)).with_state(state)
}

#[derive(Debug, Deserialize)]
struct AiRequest {
    action: Option<String>,
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    text: String,
}

async fn ai(State(state): State<Arc<GatewayState>>, request: Request) -> Result<Response, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, &()).await?;
        let audio = voice::read_audio(multipart).await?;
        let reply = voice::transcribe_blob(&state, audio).await?;
        return Ok(Json(reply).into_response());
    }

    let Json(body) = Json::<AiRequest>::from_request(request, &()).await?;

    match body.action.as_deref() {
        Some("chat") => {
            let reply = chat::complete_messages(&state, body.messages).await?;
            Ok(Json(reply).into_response())
        }
        Some("tts") => {
            let reply = voice::synthesize_text(&state, &body.text).await?;
            Ok(Json(reply).into_response())
        }
        action => {
            tracing::debug!(?action, "invalid action");
            Err(ApiError::bad_request("Invalid action"))
        }
    }
}

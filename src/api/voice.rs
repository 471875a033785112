//! Speech endpoints: transcription and synthesis

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::MultipartRejection, rejection::JsonRejection},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, GatewayState};
use crate::voice::{AudioBlob, AudioEncoding};

/// Build voice router
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/transcribe", post(transcribe))
        .route("/api/speech", post(speech))
        .with_state(state)
}

/// `{text}` reply shared by transcription and chat
#[derive(Debug, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

/// Synthesis request
#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
}

/// Synthesized speech as a data URI
#[derive(Debug, Serialize, Deserialize)]
pub struct SpeechResponse {
    #[serde(rename = "audioData")]
    pub audio_data: String,
}

/// Transcribe the multipart `audio` field
async fn transcribe(
    State(state): State<Arc<GatewayState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TextResponse>, ApiError> {
    let audio = read_audio(multipart?).await?;
    transcribe_blob(&state, audio).await.map(Json)
}

/// Synthesize `{text}` to MP3
async fn speech(
    State(state): State<Arc<GatewayState>>,
    request: Result<Json<SpeechRequest>, JsonRejection>,
) -> Result<Json<SpeechResponse>, ApiError> {
    let Json(request) = request?;
    synthesize_text(&state, &request.text).await.map(Json)
}

pub(super) async fn transcribe_blob(
    state: &GatewayState,
    audio: AudioBlob,
) -> Result<TextResponse, ApiError> {
    tracing::debug!(bytes = audio.len(), encoding = %audio.encoding(), "transcribe request");

    let text = state.transcriber.transcribe(audio).await.map_err(|e| {
        tracing::error!(error = %e, "transcription failed");
        ApiError::from(e)
    })?;

    Ok(TextResponse { text })
}

pub(super) async fn synthesize_text(
    state: &GatewayState,
    text: &str,
) -> Result<SpeechResponse, ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::bad_request("Empty text"));
    }

    let audio = state.synthesizer.synthesize(text).await.map_err(|e| {
        tracing::error!(error = %e, "speech synthesis failed");
        ApiError::from(e)
    })?;

    Ok(SpeechResponse {
        audio_data: audio.to_data_uri(),
    })
}

/// Pull the `audio` field out of a multipart upload
///
/// A missing or generic content type is treated as webm, which is what
/// browser recorders produce.
pub(super) async fn read_audio(mut multipart: Multipart) -> Result<AudioBlob, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("audio") {
            continue;
        }

        let encoding = match field.content_type() {
            None | Some("application/octet-stream") => AudioEncoding::Webm,
            Some(mime) => AudioEncoding::from_mime(mime)
                .ok_or_else(|| ApiError::bad_request(format!("Unsupported audio type: {mime}")))?,
        };

        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("Empty audio"));
        }

        return Ok(AudioBlob::new(bytes.to_vec(), encoding));
    }

    Err(ApiError::bad_request("No audio"))
}

//! Client for the Parley gateway HTTP API
//!
//! Implements all three collaborator traits against `/api/transcribe`,
//! `/api/chat` and `/api/speech`. Any non-2xx response becomes the failure
//! kind of the stage that made the call, carrying the gateway's `{error}` text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::{ConversationClient, SpeechSynthesizer, TranscriptionClient};
use crate::transcript::{ChatMessage, Turn};
use crate::voice::AudioBlob;
use crate::{Error, Result};

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

#[derive(Deserialize)]
struct SpeechResponse {
    #[serde(rename = "audioData")]
    audio_data: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
}

/// HTTP client for a running `parley serve`
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    /// Create a client for the gateway at `base_url`, e.g. `http://127.0.0.1:18790`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Extract the `{error}` message from a failed gateway response
async fn failure_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => format!("{status}: {}", parsed.error),
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => format!("{status}: {body}"),
    }
}

#[async_trait]
impl TranscriptionClient for GatewayClient {
    async fn transcribe(&self, audio: AudioBlob) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::EmptyAudio);
        }

        let file_name = audio.file_name();
        let mime = audio.encoding().mime();
        let part = Part::bytes(audio.into_bytes())
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| Error::TranscriptionFailed(e.to_string()))?;

        let response = self
            .client
            .post(self.url("/api/transcribe"))
            .multipart(Form::new().part("audio", part))
            .send()
            .await
            .map_err(|e| Error::TranscriptionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::TranscriptionFailed(failure_message(response).await));
        }

        let body: TextResponse = response
            .json()
            .await
            .map_err(|e| Error::TranscriptionFailed(e.to_string()))?;
        Ok(body.text)
    }
}

#[async_trait]
impl ConversationClient for GatewayClient {
    async fn complete(&self, history: &[Turn]) -> Result<String> {
        let request = ChatRequest {
            messages: history.iter().map(ChatMessage::from).collect(),
        };

        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::CompletionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::CompletionFailed(failure_message(response).await));
        }

        let body: TextResponse = response
            .json()
            .await
            .map_err(|e| Error::CompletionFailed(e.to_string()))?;
        Ok(body.text)
    }
}

#[async_trait]
impl SpeechSynthesizer for GatewayClient {
    async fn synthesize(&self, text: &str) -> Result<AudioBlob> {
        let response = self
            .client
            .post(self.url("/api/speech"))
            .json(&SpeechRequest { text })
            .send()
            .await
            .map_err(|e| Error::SynthesisFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::SynthesisFailed(failure_message(response).await));
        }

        let body: SpeechResponse = response
            .json()
            .await
            .map_err(|e| Error::SynthesisFailed(e.to_string()))?;

        AudioBlob::from_data_uri(&body.audio_data).map_err(|e| Error::SynthesisFailed(e.to_string()))
    }
}

//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use super::{TranscriptionClient, error_message};
use crate::voice::AudioBlob;
use crate::{Error, Result};

/// Response from Whisper-compatible transcription APIs
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// STT provider backend
///
/// Both speak the OpenAI transcription protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    Groq,
    OpenAi,
}

impl SttProvider {
    /// Default API base URL
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Default transcription model
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Groq => "whisper-large-v3",
            Self::OpenAi => "whisper-1",
        }
    }

    /// Parse a provider name from configuration
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(provider: SttProvider, api_key: SecretString, model: Option<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "{provider:?} API key required for transcription"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            base_url: provider.base_url().to_string(),
            provider,
        })
    }

    /// Point the client at a different API root (proxies, tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TranscriptionClient for SpeechToText {
    async fn transcribe(&self, audio: AudioBlob) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::EmptyAudio);
        }

        tracing::debug!(
            provider = ?self.provider,
            model = %self.model,
            audio_bytes = audio.len(),
            encoding = %audio.encoding(),
            "starting transcription"
        );

        let file_name = audio.file_name();
        let mime = audio.encoding().mime();
        let part = Part::bytes(audio.into_bytes())
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| Error::TranscriptionFailed(e.to_string()))?;

        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                Error::TranscriptionFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            tracing::error!(error = %message, "transcription API error");
            return Err(Error::TranscriptionFailed(message));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            Error::TranscriptionFailed(e.to_string())
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

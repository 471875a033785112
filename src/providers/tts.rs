//! Text-to-speech (TTS) processing

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{SpeechSynthesizer, error_message};
use crate::voice::{AudioBlob, AudioEncoding};
use crate::{Error, Result};

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAi,
    ElevenLabs,
}

impl TtsProvider {
    /// Default API base URL
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::ElevenLabs => "https://api.elevenlabs.io/v1",
        }
    }

    /// Default synthesis model
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "tts-1",
            Self::ElevenLabs => "eleven_multilingual_v2",
        }
    }

    /// Parse a provider name from configuration
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "elevenlabs" => Some(Self::ElevenLabs),
            _ => None,
        }
    }
}

/// Synthesizes speech from text; always returns MP3
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
    base_url: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS client
    ///
    /// `voice` is an `OpenAI` voice name or an `ElevenLabs` voice id.
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        provider: TtsProvider,
        api_key: SecretString,
        voice: String,
        model: Option<String>,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "{provider:?} API key required for TTS"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            voice,
            speed: 1.0,
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

    /// Set the speed multiplier (`OpenAI` only, 0.25 to 4.0)
    #[must_use]
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed.clamp(0.25, 4.0);
        self
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, text: &str) -> Result<reqwest::Response> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        self.client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SynthesisFailed(e.to_string()))
    }

    /// Synthesize using `ElevenLabs` TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<reqwest::Response> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        self.client
            .post(format!("{}/text-to-speech/{}", self.base_url, self.voice))
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SynthesisFailed(e.to_string()))
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<AudioBlob> {
        tracing::debug!(provider = ?self.provider, chars = text.len(), "synthesizing speech");

        let response = match self.provider {
            TtsProvider::OpenAi => self.synthesize_openai(text).await?,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await?,
        };

        if !response.status().is_success() {
            let message = error_message(response).await;
            tracing::error!(provider = ?self.provider, error = %message, "TTS API error");
            return Err(Error::SynthesisFailed(message));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::SynthesisFailed(e.to_string()))?;

        tracing::debug!(bytes = audio.len(), "speech synthesized");
        Ok(AudioBlob::new(audio.to_vec(), AudioEncoding::Mpeg))
    }
}

//! External speech-to-text, chat-completion and speech-synthesis collaborators
//!
//! Each collaborator is a trait so the session controller can be wired either
//! straight to a provider API or to the Parley gateway over HTTP.

mod chat;
mod gateway;
mod stt;
mod tts;

use async_trait::async_trait;
use serde::Deserialize;

pub use chat::{ChatCompletion, ChatProvider};
pub use gateway::GatewayClient;
pub use stt::{SpeechToText, SttProvider};
pub use tts::{TextToSpeech, TtsProvider};

use crate::Result;
use crate::transcript::Turn;
use crate::voice::AudioBlob;

/// Converts recorded audio into text
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Transcribe one blob; the blob is consumed
    ///
    /// # Errors
    ///
    /// `EmptyAudio` for zero-length input, `TranscriptionFailed` otherwise
    async fn transcribe(&self, audio: AudioBlob) -> Result<String>;
}

/// Produces the assistant's reply to a conversation
#[async_trait]
pub trait ConversationClient: Send + Sync {
    /// Complete the full history, oldest turn first
    ///
    /// An empty reply is a valid result.
    ///
    /// # Errors
    ///
    /// `CompletionFailed` on provider error
    async fn complete(&self, history: &[Turn]) -> Result<String>;
}

/// Turns text into encoded audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`
    ///
    /// # Errors
    ///
    /// `SynthesisFailed` on provider error
    async fn synthesize(&self, text: &str) -> Result<AudioBlob>;
}

/// OpenAI-style error body: `{"error": {"message": ...}}`
#[derive(Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// Best-effort human-readable message from a non-2xx provider response
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let detail = serde_json::from_str::<ProviderErrorBody>(&body)
        .map_or(body, |parsed| parsed.error.message);

    if detail.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {detail}")
    }
}

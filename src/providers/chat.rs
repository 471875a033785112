//! Chat completion (LLM reply generation)

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ConversationClient, error_message};
use crate::persona::Persona;
use crate::transcript::Turn;
use crate::{Error, Result};

/// Chat provider backend (OpenAI-compatible `/chat/completions`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatProvider {
    Groq,
    OpenAi,
}

impl ChatProvider {
    /// Default API base URL
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Default chat model
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::OpenAi => "gpt-4o-mini",
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

/// Generates assistant replies, speaking as a fixed persona
///
/// The persona's system prompt is prepended to every request. History is sent
/// in full; nothing is windowed or truncated here.
pub struct ChatCompletion {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    temperature: f32,
    persona: Persona,
    provider: ChatProvider,
}

impl ChatCompletion {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        provider: ChatProvider,
        api_key: SecretString,
        model: Option<String>,
        persona: Persona,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "{provider:?} API key required for chat"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            base_url: provider.base_url().to_string(),
            temperature: 0.7,
            persona,
            provider,
        })
    }

    /// Point the client at a different API root (proxies, tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the sampling temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub const fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Build the request body: persona first, then history in order
    fn request<'a>(&'a self, history: &'a [Turn]) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message {
            role: "system",
            content: self.persona.system_prompt(),
        });
        messages.extend(history.iter().map(|turn| Message {
            role: turn.role.as_str(),
            content: &turn.content,
        }));

        ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl ConversationClient for ChatCompletion {
    async fn complete(&self, history: &[Turn]) -> Result<String> {
        tracing::debug!(
            provider = ?self.provider,
            model = %self.model,
            turns = history.len(),
            "requesting chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request(history))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                Error::CompletionFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            tracing::error!(error = %message, "chat API error");
            return Err(Error::CompletionFailed(message));
        }

        let result: ChatCompletionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse chat response");
            Error::CompletionFailed(e.to_string())
        })?;

        let reply = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::info!(chars = reply.len(), "chat completion complete");
        Ok(reply)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

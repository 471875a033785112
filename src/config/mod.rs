//! Configuration management for Parley
//!
//! Precedence is env > TOML file > default. Resolution itself is a pure
//! function of the parsed file and an environment lookup, see
//! [`Config::from_sources`].

pub mod file;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::persona::Persona;
use crate::providers::{
    ChatCompletion, ChatProvider, SpeechToText, SttProvider, TextToSpeech, TtsProvider,
};
use crate::session::StageTimeouts;
use crate::{Error, Result};

use file::ParleyConfigFile;

/// Default gateway port
pub const DEFAULT_PORT: u16 = 18790;

/// Default `ElevenLabs` voice ("Rachel")
const ELEVENLABS_DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

/// Parley configuration
#[derive(Debug)]
pub struct Config {
    /// Assistant persona
    pub persona: Persona,

    /// API keys
    pub api_keys: ApiKeys,

    /// Chat model configuration
    pub llm: LlmConfig,

    /// STT/TTS configuration
    pub voice: VoiceConfig,

    /// Gateway server configuration
    pub server: ServerConfig,

    /// Per-stage upper bounds for the voice session
    pub timeouts: StageTimeouts,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `Groq` API key (Whisper and Llama)
    pub groq: Option<SecretString>,

    /// `OpenAI` API key
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

/// Chat model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: ChatProvider,

    /// Model override; provider default when `None`
    pub model: Option<String>,

    pub temperature: f32,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,
    pub stt_model: Option<String>,
    pub tts_provider: TtsProvider,
    pub tts_model: Option<String>,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

/// Gateway server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Gateway URL used by `parley talk`
    pub gateway_url: String,
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognized
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// Empty environment values count as unset.
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognized
    pub fn from_sources(fc: ParleyConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // API keys (env > toml > None)
        let secret = |key: &str, fallback: Option<String>| {
            var(key)
                .or(fallback)
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
        };
        let api_keys = ApiKeys {
            groq: secret("GROQ_API_KEY", fc.api_keys.groq),
            openai: secret("OPENAI_API_KEY", fc.api_keys.openai),
            elevenlabs: secret("ELEVENLABS_API_KEY", fc.api_keys.elevenlabs),
        };

        // Persona (env > toml > built-in)
        let default_persona = Persona::default();
        let persona = Persona::new(
            var("PARLEY_PERSONA_NAME")
                .or(fc.persona.name)
                .unwrap_or(default_persona.name),
            var("PARLEY_SYSTEM_PROMPT")
                .or(fc.persona.system_prompt)
                .unwrap_or(default_persona.system_prompt),
        );

        let llm = LlmConfig {
            provider: parse_provider(
                "LLM",
                var("PARLEY_LLM_PROVIDER").or(fc.llm.provider),
                ChatProvider::from_name,
                ChatProvider::Groq,
            )?,
            model: var("PARLEY_LLM_MODEL").or(fc.llm.model),
            temperature: var("PARLEY_LLM_TEMPERATURE")
                .and_then(|s| s.parse().ok())
                .or(fc.llm.temperature)
                .unwrap_or(0.7),
        };

        let tts_provider = parse_provider(
            "TTS",
            var("PARLEY_TTS_PROVIDER").or(fc.voice.tts_provider),
            TtsProvider::from_name,
            TtsProvider::OpenAi,
        )?;
        let voice = VoiceConfig {
            stt_provider: parse_provider(
                "STT",
                var("PARLEY_STT_PROVIDER").or(fc.voice.stt_provider),
                SttProvider::from_name,
                SttProvider::Groq,
            )?,
            stt_model: var("PARLEY_STT_MODEL").or(fc.voice.stt_model),
            tts_provider,
            tts_model: var("PARLEY_TTS_MODEL").or(fc.voice.tts_model),
            tts_voice: var("PARLEY_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| match tts_provider {
                    TtsProvider::OpenAi => "alloy".to_string(),
                    TtsProvider::ElevenLabs => ELEVENLABS_DEFAULT_VOICE.to_string(),
                }),
            tts_speed: var("PARLEY_TTS_SPEED")
                .and_then(|s| s.parse().ok())
                .or(fc.voice.tts_speed)
                .unwrap_or(1.0),
        };

        // Server config (env > toml > default)
        let server = ServerConfig {
            port: var("PARLEY_PORT")
                .or_else(|| var("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            gateway_url: var("PARLEY_GATEWAY_URL")
                .or(fc.server.gateway_url)
                .unwrap_or_else(|| format!("http://127.0.0.1:{DEFAULT_PORT}")),
        };

        let defaults = StageTimeouts::default();
        let seconds = |key: &str, file: Option<u64>, default: Duration| {
            var(key)
                .and_then(|s| s.parse().ok())
                .or(file)
                .map_or(default, Duration::from_secs)
        };
        let timeouts = StageTimeouts {
            transcribe: seconds(
                "PARLEY_TRANSCRIBE_TIMEOUT",
                fc.timeouts.transcribe,
                defaults.transcribe,
            ),
            complete: seconds(
                "PARLEY_COMPLETE_TIMEOUT",
                fc.timeouts.complete,
                defaults.complete,
            ),
            speak: seconds("PARLEY_SPEAK_TIMEOUT", fc.timeouts.speak, defaults.speak),
        };

        Ok(Self {
            persona,
            api_keys,
            llm,
            voice,
            server,
            timeouts,
        })
    }

    /// Build the configured speech-to-text client
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is not set
    pub fn speech_to_text(&self) -> Result<SpeechToText> {
        let key = match self.voice.stt_provider {
            SttProvider::Groq => required(self.api_keys.groq.as_ref(), "GROQ_API_KEY")?,
            SttProvider::OpenAi => required(self.api_keys.openai.as_ref(), "OPENAI_API_KEY")?,
        };

        SpeechToText::new(self.voice.stt_provider, key, self.voice.stt_model.clone())
    }

    /// Build the configured chat client, speaking as the configured persona
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is not set
    pub fn chat_completion(&self) -> Result<ChatCompletion> {
        let key = match self.llm.provider {
            ChatProvider::Groq => required(self.api_keys.groq.as_ref(), "GROQ_API_KEY")?,
            ChatProvider::OpenAi => required(self.api_keys.openai.as_ref(), "OPENAI_API_KEY")?,
        };

        Ok(ChatCompletion::new(
            self.llm.provider,
            key,
            self.llm.model.clone(),
            self.persona.clone(),
        )?
        .with_temperature(self.llm.temperature))
    }

    /// Build the configured speech synthesis client
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is not set
    pub fn text_to_speech(&self) -> Result<TextToSpeech> {
        let key = match self.voice.tts_provider {
            TtsProvider::OpenAi => required(self.api_keys.openai.as_ref(), "OPENAI_API_KEY")?,
            TtsProvider::ElevenLabs => {
                required(self.api_keys.elevenlabs.as_ref(), "ELEVENLABS_API_KEY")?
            }
        };

        Ok(TextToSpeech::new(
            self.voice.tts_provider,
            key,
            self.voice.tts_voice.clone(),
            self.voice.tts_model.clone(),
        )?
        .with_speed(self.voice.tts_speed))
    }
}

fn required(key: Option<&SecretString>, name: &str) -> Result<SecretString> {
    key.map(|k| SecretString::from(k.expose_secret().to_owned()))
        .ok_or_else(|| Error::Config(format!("{name} is not set")))
}

fn parse_provider<P>(
    kind: &str,
    name: Option<String>,
    parse: fn(&str) -> Option<P>,
    default: P,
) -> Result<P> {
    match name {
        None => Ok(default),
        Some(name) => parse(&name)
            .ok_or_else(|| Error::Config(format!("unknown {kind} provider: {name}"))),
    }
}

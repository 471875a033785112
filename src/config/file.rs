//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ParleyConfigFile {
    pub persona: PersonaFileConfig,
    pub llm: LlmFileConfig,
    pub voice: VoiceFileConfig,
    pub api_keys: ApiKeysFileConfig,
    pub server: ServerFileConfig,
    pub timeouts: TimeoutsFileConfig,
}

/// Assistant persona override
#[derive(Debug, Default, Deserialize)]
pub struct PersonaFileConfig {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
}

/// Chat model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// "groq" or "openai"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

/// Speech-to-text and speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "groq" or "openai"
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,

    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,

    /// `OpenAI` voice name or `ElevenLabs` voice id
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub groq: Option<String>,
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Gateway server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Port `parley serve` listens on
    pub port: Option<u16>,

    /// Gateway `parley talk` connects to
    pub gateway_url: Option<String>,
}

/// Per-stage upper bounds, in seconds
#[derive(Debug, Default, Deserialize)]
pub struct TimeoutsFileConfig {
    pub transcribe: Option<u64>,
    pub complete: Option<u64>,
    pub speak: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    config_file_path().map_or_else(ParleyConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> ParleyConfigFile {
    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ParleyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}

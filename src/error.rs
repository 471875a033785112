//! Error types for Parley

use std::time::Duration;

use thiserror::Error;

use crate::session::{SessionState, Stage};

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Parley
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or codec error that is not a capture precondition failure
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access was refused by the user or OS
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// `start_recording` called while a recording is active
    #[error("already recording")]
    AlreadyRecording,

    /// `stop_recording` called without an active recording
    #[error("no active recording")]
    NoActiveRecording,

    /// Zero-length audio handed to transcription
    #[error("audio is empty")]
    EmptyAudio,

    /// Speech-to-text collaborator failed
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Chat-completion collaborator failed
    #[error("completion failed: {0}")]
    CompletionFailed(String),

    /// Speech-synthesis collaborator or playback failed
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    /// A networked stage exceeded its configured upper bound
    #[error("{stage} stage timed out after {after:?}")]
    StageTimeout {
        /// Stage that timed out
        stage: Stage,
        /// Configured bound
        after: Duration,
    },

    /// `toggle` rejected because a pipeline is already in flight
    #[error("session busy ({state})")]
    Busy {
        /// State the session was in when the call was rejected
        state: SessionState,
    },

    /// The session was torn down while the operation was outstanding
    #[error("session shut down")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error is one of the stage-level kinds of `stage`
    ///
    /// Anything else coming out of a stage collaborator gets wrapped into the
    /// stage's failure kind by the session controller.
    #[must_use]
    pub const fn belongs_to(&self, stage: Stage) -> bool {
        match self {
            Self::StageTimeout { .. } | Self::Cancelled => true,
            Self::EmptyAudio | Self::TranscriptionFailed(_) => matches!(stage, Stage::Transcribe),
            Self::CompletionFailed(_) => matches!(stage, Stage::Complete),
            Self::SynthesisFailed(_) => matches!(stage, Stage::Speak),
            _ => false,
        }
    }
}

//! Session states and the transition table
//!
//! Every state change goes through [`next`], a pure function of the current
//! state and a [`Transition`]. The controller only applies a change when
//! `next` returns `Some`, so an illegal move can never be observed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a voice session is in its capture/reply cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Resting state; ready to record
    #[default]
    Idle,
    /// Microphone held, audio buffering
    Capturing,
    /// Waiting on speech-to-text
    Transcribing,
    /// Waiting on the assistant's reply
    Generating,
    /// Playing the reply
    Speaking,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Transcribing => "transcribing",
            Self::Generating => "generating",
            Self::Speaking => "speaking",
        }
    }

    /// Whether a reply pipeline is in flight
    #[must_use]
    pub const fn is_processing(self) -> bool {
        matches!(self, Self::Transcribing | Self::Generating | Self::Speaking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A networked step of the reply pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transcribe,
    Complete,
    Speak,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Complete => "complete",
            Self::Speak => "speak",
        }
    }

    /// State the session is in while this stage runs
    #[must_use]
    pub const fn state(self) -> SessionState {
        match self {
            Self::Transcribe => SessionState::Transcribing,
            Self::Complete => SessionState::Generating,
            Self::Speak => SessionState::Speaking,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome that moves the session from one state to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Microphone acquired
    CaptureStarted,
    /// Recording flushed into a blob
    CaptureStopped,
    /// Stopping the recording failed; the device has been released
    CaptureFailed,
    /// A stage finished successfully
    StageSucceeded(Stage),
    /// A stage failed, timed out or was cancelled
    StageFailed(Stage),
    /// Teardown or a dropped pipeline
    Reset,
}

/// Transition table
///
/// Returns the state reached by applying `transition` in `state`, or `None`
/// if the transition is not legal there.
#[must_use]
pub const fn next(state: SessionState, transition: Transition) -> Option<SessionState> {
    use SessionState::{Capturing, Generating, Idle, Speaking, Transcribing};

    match (state, transition) {
        (Idle, Transition::CaptureStarted) => Some(Capturing),
        (Capturing, Transition::CaptureStopped) => Some(Transcribing),
        (Capturing, Transition::CaptureFailed) => Some(Idle),
        (Transcribing, Transition::StageSucceeded(Stage::Transcribe)) => Some(Generating),
        (Generating, Transition::StageSucceeded(Stage::Complete)) => Some(Speaking),
        (Speaking, Transition::StageSucceeded(Stage::Speak)) => Some(Idle),
        (Transcribing, Transition::StageFailed(Stage::Transcribe))
        | (Generating, Transition::StageFailed(Stage::Complete))
        | (Speaking, Transition::StageFailed(Stage::Speak))
        | (_, Transition::Reset) => Some(Idle),
        _ => None,
    }
}

//! Notifications published by a voice session

use serde::Serialize;

use super::state::{SessionState, Stage};
use crate::transcript::Turn;

/// Something a UI may want to react to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A transition was applied
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// A turn was added to the transcript
    TurnAppended(Turn),

    /// A stage failed and the session returned to idle
    StageFailed { stage: Stage, message: String },
}

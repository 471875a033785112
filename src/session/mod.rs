//! Voice session state machine
//!
//! [`VoiceSession`] drives one conversation through
//! `Idle → Capturing → Transcribing → Generating → Speaking → Idle`,
//! one turn at a time.

mod controller;
mod events;
pub mod state;

pub use controller::{Exchange, StageTimeouts, Toggle, VoiceSession, VoiceSessionBuilder};
pub use events::SessionEvent;
pub use state::{SessionState, Stage, Transition};

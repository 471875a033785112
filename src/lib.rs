//! Parley - a push-to-talk voice conversation assistant
//!
//! One toggle starts recording; the next stops it, transcribes what was said,
//! asks a chat model for a reply and speaks that reply aloud.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  VoiceSession                        │
//! │  Idle → Capturing → Transcribing → Generating →      │
//! │  Speaking → Idle                                     │
//! └──────┬─────────────┬─────────────┬─────────────┬─────┘
//!        │             │             │             │
//!   Microphone   Transcription   Conversation   Speaker
//!    (cpal)         Client          Client     (TTS + cpal)
//!                      │             │             │
//!               ┌──────▼─────────────▼─────────────▼──────┐
//!               │  provider APIs, direct or via gateway   │
//!               └─────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod persona;
pub mod providers;
pub mod session;
pub mod transcript;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use persona::Persona;
pub use session::{SessionEvent, SessionState, Stage, Toggle, VoiceSession, VoiceSessionBuilder};
pub use transcript::{Role, Transcript, Turn};

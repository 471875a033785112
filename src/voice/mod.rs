//! Voice I/O
//!
//! Microphone capture, speaker playback, audio encoding and the audible
//! speech output used for assistant replies.

mod audio;
mod capture;
mod playback;
mod speaker;

pub use audio::{AudioBlob, AudioEncoding, SAMPLE_RATE, downmix, samples_to_wav, wav_to_samples};
pub use capture::{AudioCapture, Microphone, encode_recording};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE};
pub use speaker::{SpeechOutput, Speaker};

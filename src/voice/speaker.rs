//! Audible speech output

use std::sync::Arc;

use async_trait::async_trait;

use super::playback::AudioPlayback;
use crate::Result;
use crate::providers::SpeechSynthesizer;

/// Speaks assistant replies aloud
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Synthesize `text` and play it, returning once playback has finished
    ///
    /// Empty or whitespace-only text is a no-op.
    ///
    /// # Errors
    ///
    /// `SynthesisFailed` if synthesis fails, `Audio` if playback fails
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Synthesizes through a collaborator, then plays on the default output device
pub struct Speaker {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: AudioPlayback,
}

impl Speaker {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, playback: AudioPlayback) -> Self {
        Self {
            synthesizer,
            playback,
        }
    }
}

#[async_trait]
impl SpeechOutput for Speaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("nothing to speak");
            return Ok(());
        }

        let audio = self.synthesizer.synthesize(text).await?;
        tracing::debug!(bytes = audio.len(), encoding = %audio.encoding(), "playing reply");

        self.playback.play_blob(audio).await
    }
}

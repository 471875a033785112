//! The voice session controller
//!
//! A session is a cooperative, single-task state machine: `toggle` is the only
//! entry point, and the stored [`SessionState`] is the only mutual exclusion.
//! A call whose precondition does not match the current state is rejected
//! with [`Error::Busy`]. No `RefCell` borrow is held across an `.await`.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::SessionEvent;
use super::state::{SessionState, Stage, Transition, next};
use crate::providers::{ConversationClient, TranscriptionClient};
use crate::transcript::{Transcript, Turn};
use crate::voice::{AudioCapture, SpeechOutput};
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 64;

/// Upper bound on each networked stage
///
/// Serialized as whole seconds; a bound with a sub-second part is rejected
/// rather than truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(with = "secs")]
    pub transcribe: Duration,
    #[serde(with = "secs")]
    pub complete: Duration,
    #[serde(with = "secs")]
    pub speak: Duration,
}

impl StageTimeouts {
    /// Same bound for every stage
    #[must_use]
    pub const fn uniform(after: Duration) -> Self {
        Self {
            transcribe: after,
            complete: after,
            speak: after,
        }
    }

    #[must_use]
    pub const fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Transcribe => self.transcribe,
            Stage::Complete => self.complete,
            Stage::Speak => self.speak,
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            transcribe: Duration::from_secs(30),
            complete: Duration::from_secs(60),
            speak: Duration::from_secs(120),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() != 0 {
            return Err(serde::ser::Error::custom(format!(
                "stage timeout {value:?} is not a whole number of seconds"
            )));
        }
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// One completed user/assistant exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: Turn,
    pub assistant: Turn,
}

/// What an accepted `toggle` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    /// The microphone is now recording
    Recording,
    /// Recording stopped and the full reply pipeline ran
    Replied(Exchange),
}

/// Builds a [`VoiceSession`] from its collaborators
pub struct VoiceSessionBuilder {
    capture: Box<dyn AudioCapture>,
    transcriber: Arc<dyn TranscriptionClient>,
    conversation: Arc<dyn ConversationClient>,
    speech: Arc<dyn SpeechOutput>,
    timeouts: StageTimeouts,
    transcript: Transcript,
    event_capacity: usize,
}

impl VoiceSessionBuilder {
    #[must_use]
    pub fn new(
        capture: Box<dyn AudioCapture>,
        transcriber: Arc<dyn TranscriptionClient>,
        conversation: Arc<dyn ConversationClient>,
        speech: Arc<dyn SpeechOutput>,
    ) -> Self {
        Self {
            capture,
            transcriber,
            conversation,
            speech,
            timeouts: StageTimeouts::default(),
            transcript: Transcript::new(),
            event_capacity: EVENT_CAPACITY,
        }
    }

    /// Set per-stage timeouts
    #[must_use]
    pub const fn timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Resume from an existing transcript
    #[must_use]
    pub fn transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = transcript;
        self
    }

    /// Capacity of the event channel; slow subscribers lag past this
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn build(self) -> VoiceSession {
        let (events, _) = broadcast::channel(self.event_capacity);
        let id = Uuid::new_v4();

        tracing::debug!(session = %id, "voice session created");

        VoiceSession {
            id,
            state: Cell::new(SessionState::Idle),
            transcript: RefCell::new(self.transcript),
            capture: RefCell::new(self.capture),
            transcriber: self.transcriber,
            conversation: self.conversation,
            speech: self.speech,
            timeouts: self.timeouts,
            events,
            shutdown: CancellationToken::new(),
        }
    }
}

/// A long-lived conversation driven by push-to-talk toggles
pub struct VoiceSession {
    id: Uuid,
    state: Cell<SessionState>,
    transcript: RefCell<Transcript>,
    capture: RefCell<Box<dyn AudioCapture>>,
    transcriber: Arc<dyn TranscriptionClient>,
    conversation: Arc<dyn ConversationClient>,
    speech: Arc<dyn SpeechOutput>,
    timeouts: StageTimeouts,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl VoiceSession {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Snapshot of the transcript, oldest turn first
    #[must_use]
    pub fn transcript(&self) -> Vec<Turn> {
        self.transcript.borrow().turns().to_vec()
    }

    #[must_use]
    pub const fn timeouts(&self) -> StageTimeouts {
        self.timeouts
    }

    /// Receive state changes, appended turns and stage failures
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Start or stop a turn
    ///
    /// In `Idle` this starts recording. In `Capturing` it stops recording and
    /// runs transcribe, complete and speak in order, returning once the reply
    /// has been spoken. Every failure leaves the session `Idle`.
    ///
    /// # Errors
    ///
    /// - `Busy` if a reply is already in flight (state unchanged)
    /// - `Cancelled` after [`shutdown`](Self::shutdown)
    /// - capture errors from the microphone
    /// - the failing stage's error kind, or `StageTimeout`
    pub async fn toggle(&self) -> Result<Toggle> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match self.state.get() {
            SessionState::Idle => self.start_capture(),
            SessionState::Capturing => self.finish_turn().await.map(Toggle::Replied),
            state => {
                tracing::debug!(session = %self.id, %state, "toggle rejected");
                Err(Error::Busy { state })
            }
        }
    }

    /// Tear the session down
    ///
    /// Outstanding stage calls are abandoned and their results discarded, the
    /// microphone is released, and the session returns to `Idle`. Every later
    /// `toggle` fails with `Cancelled`.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        tracing::info!(session = %self.id, state = %self.state.get(), "shutting down voice session");
        self.shutdown.cancel();
        self.release_microphone();
        self.apply(Transition::Reset);
    }

    fn start_capture(&self) -> Result<Toggle> {
        let started = self.capture.borrow_mut().start_recording();

        if let Err(e) = started {
            tracing::warn!(session = %self.id, error = %e, "failed to start recording");
            return Err(e);
        }

        self.apply(Transition::CaptureStarted);
        Ok(Toggle::Recording)
    }

    async fn finish_turn(&self) -> Result<Exchange> {
        let stopped = self.capture.borrow_mut().stop_recording();

        let audio = match stopped {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "failed to stop recording");
                self.release_microphone();
                self.apply(Transition::CaptureFailed);
                return Err(e);
            }
        };

        self.apply(Transition::CaptureStopped);
        let _guard = PipelineGuard { session: self };

        let text = self
            .run_stage(Stage::Transcribe, self.transcriber.transcribe(audio))
            .await?;
        let user = self.append(Turn::user(text));
        self.advance(Stage::Transcribe)?;

        let history = self.transcript();
        let reply = self
            .run_stage(Stage::Complete, self.conversation.complete(&history))
            .await?;
        let assistant = self.append(Turn::assistant(reply));
        self.advance(Stage::Complete)?;

        self.run_stage(Stage::Speak, self.speech.speak(&assistant.content))
            .await?;
        self.advance(Stage::Speak)?;

        Ok(Exchange { user, assistant })
    }

    /// Await one stage under its timeout and the shutdown token
    ///
    /// On failure the session takes the stage's failure transition.
    async fn run_stage<T>(
        &self,
        stage: Stage,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let after = self.timeouts.for_stage(stage);
        tracing::debug!(session = %self.id, %stage, ?after, "stage started");

        let outcome = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(after, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(normalize(stage, e)),
                Err(_) => Err(Error::StageTimeout { stage, after }),
            },
        };

        if let Err(e) = &outcome {
            self.fail(stage, e);
        }
        outcome
    }

    fn advance(&self, stage: Stage) -> Result<()> {
        if self.apply(Transition::StageSucceeded(stage)) {
            Ok(())
        } else {
            Err(Error::Cancelled)
        }
    }

    fn fail(&self, stage: Stage, error: &Error) {
        if !self.apply(Transition::StageFailed(stage)) {
            return;
        }

        tracing::warn!(session = %self.id, %stage, error = %error, "stage failed");
        let _ = self.events.send(SessionEvent::StageFailed {
            stage,
            message: error.to_string(),
        });
    }

    fn append(&self, turn: Turn) -> Turn {
        let turn = self.transcript.borrow_mut().append(turn);
        tracing::info!(session = %self.id, role = %turn.role, content = %turn.content, "turn appended");
        let _ = self.events.send(SessionEvent::TurnAppended(turn.clone()));
        turn
    }

    /// Compare-and-set the stored state through the transition table
    fn apply(&self, transition: Transition) -> bool {
        let from = self.state.get();
        let Some(to) = next(from, transition) else {
            tracing::debug!(session = %self.id, %from, ?transition, "transition not applicable");
            return false;
        };

        self.state.set(to);
        if from != to {
            tracing::debug!(session = %self.id, %from, %to, "state changed");
            let _ = self.events.send(SessionEvent::StateChanged { from, to });
        }
        true
    }

    fn release_microphone(&self) {
        if let Ok(mut capture) = self.capture.try_borrow_mut() {
            capture.release();
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.capture.get_mut().release();
    }
}

/// Returns the session to `Idle` if a pipeline future is dropped mid-flight
struct PipelineGuard<'a> {
    session: &'a VoiceSession,
}

impl Drop for PipelineGuard<'_> {
    fn drop(&mut self) {
        if self.session.state.get().is_processing() {
            tracing::debug!(session = %self.session.id, "pipeline abandoned");
            self.session.apply(Transition::Reset);
        }
    }
}

/// Map a collaborator error onto the kind owned by `stage`
fn normalize(stage: Stage, error: Error) -> Error {
    if error.belongs_to(stage) {
        return error;
    }

    let cause = error.to_string();
    match stage {
        Stage::Transcribe => Error::TranscriptionFailed(cause),
        Stage::Complete => Error::CompletionFailed(cause),
        Stage::Speak => Error::SynthesisFailed(cause),
    }
}

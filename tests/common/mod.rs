//! Shared test utilities: scripted collaborators and a fake microphone

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use parley::providers::{ConversationClient, SpeechSynthesizer, TranscriptionClient};
use parley::session::StageTimeouts;
use parley::voice::{AudioBlob, AudioCapture, AudioEncoding, SpeechOutput};
use parley::{Error, Result, Turn, VoiceSession, VoiceSessionBuilder};

/// Queue of outcomes handed out one per call, then a fallback
///
/// Every call yields to the scheduler first so concurrent callers on the same
/// task can observe the in-flight state.
pub struct Script<T> {
    outcomes: Mutex<VecDeque<Result<T>>>,
    fallback: T,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl<T: Clone + Send> Script<T> {
    pub fn new(fallback: T) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, outcome: Result<T>) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn next(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcomes.lock().unwrap().pop_front();
        outcome.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// What the fake microphone saw
#[derive(Default)]
pub struct CaptureProbe {
    pub starts: AtomicUsize,
    pub releases: AtomicUsize,
    pub recording: AtomicBool,
}

impl CaptureProbe {
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

enum StartFailure {
    Denied,
    NoDevice,
}

/// Microphone that "records" a fixed byte payload
pub struct FakeCapture {
    audio: Vec<u8>,
    start_failure: Option<StartFailure>,
    fail_stop: bool,
    probe: Arc<CaptureProbe>,
}

impl FakeCapture {
    pub fn with_audio(audio: &[u8]) -> Self {
        Self {
            audio: audio.to_vec(),
            start_failure: None,
            fail_stop: false,
            probe: Arc::new(CaptureProbe::default()),
        }
    }

    pub fn denied() -> Self {
        Self {
            start_failure: Some(StartFailure::Denied),
            ..Self::with_audio(b"hello")
        }
    }

    pub fn no_device() -> Self {
        Self {
            start_failure: Some(StartFailure::NoDevice),
            ..Self::with_audio(b"hello")
        }
    }

    pub fn failing_stop() -> Self {
        Self {
            fail_stop: true,
            ..Self::with_audio(b"hello")
        }
    }

    pub fn probe(&self) -> Arc<CaptureProbe> {
        Arc::clone(&self.probe)
    }
}

impl AudioCapture for FakeCapture {
    fn start_recording(&mut self) -> Result<()> {
        if self.probe.is_recording() {
            return Err(Error::AlreadyRecording);
        }
        match self.start_failure {
            Some(StartFailure::Denied) => {
                return Err(Error::PermissionDenied("user refused".to_string()));
            }
            Some(StartFailure::NoDevice) => {
                return Err(Error::DeviceUnavailable("no input device".to_string()));
            }
            None => {}
        }

        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        self.probe.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<AudioBlob> {
        if !self.probe.is_recording() {
            return Err(Error::NoActiveRecording);
        }
        self.probe.recording.store(false, Ordering::SeqCst);

        if self.fail_stop {
            return Err(Error::Audio("stream error while flushing".to_string()));
        }
        Ok(AudioBlob::new(self.audio.clone(), AudioEncoding::Wav))
    }

    fn release(&mut self) {
        self.probe.recording.store(false, Ordering::SeqCst);
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn is_recording(&self) -> bool {
        self.probe.is_recording()
    }
}

/// Transcriber that records what it was sent
pub struct FakeTranscriber {
    pub script: Script<String>,
    pub received: Mutex<Vec<AudioBlob>>,
}

impl FakeTranscriber {
    pub fn new(script: Script<String>) -> Arc<Self> {
        Arc::new(Self {
            script,
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Self::new(Script::new(text.to_string()))
    }
}

#[async_trait]
impl TranscriptionClient for FakeTranscriber {
    async fn transcribe(&self, audio: AudioBlob) -> Result<String> {
        self.received.lock().unwrap().push(audio);
        self.script.next().await
    }
}

/// Chat collaborator that records every history it was asked to complete
pub struct FakeConversation {
    pub script: Script<String>,
    pub histories: Mutex<Vec<Vec<Turn>>>,
}

impl FakeConversation {
    pub fn new(script: Script<String>) -> Arc<Self> {
        Arc::new(Self {
            script,
            histories: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Self::new(Script::new(text.to_string()))
    }

    pub fn histories(&self) -> Vec<Vec<Turn>> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationClient for FakeConversation {
    async fn complete(&self, history: &[Turn]) -> Result<String> {
        self.histories.lock().unwrap().push(history.to_vec());
        self.script.next().await
    }
}

/// Speech output that records what it was asked to say
///
/// `silenced` counts calls whose future was dropped before it settled, the
/// way real playback is cut off.
pub struct FakeSpeech {
    pub script: Script<()>,
    pub spoken: Mutex<Vec<String>>,
    pub silenced: Arc<AtomicUsize>,
}

/// Counts a speak call as silenced unless disarmed on completion
struct Playing {
    silenced: Arc<AtomicUsize>,
    settled: bool,
}

impl Drop for Playing {
    fn drop(&mut self) {
        if !self.settled {
            self.silenced.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl FakeSpeech {
    pub fn new(script: Script<()>) -> Arc<Self> {
        Arc::new(Self {
            script,
            spoken: Mutex::new(Vec::new()),
            silenced: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn silenced(&self) -> usize {
        self.silenced.load(Ordering::SeqCst)
    }

    pub fn ok() -> Arc<Self> {
        Self::new(Script::new(()))
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechOutput for FakeSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        let mut playing = Playing {
            silenced: Arc::clone(&self.silenced),
            settled: false,
        };
        let outcome = self.script.next().await;
        playing.settled = true;
        outcome
    }
}

/// Synthesizer returning fixed MP3 bytes
pub struct FakeSynthesizer {
    pub script: Script<Vec<u8>>,
    pub texts: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn new(script: Script<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            script,
            texts: Mutex::new(Vec::new()),
        })
    }

    pub fn returning(bytes: &[u8]) -> Arc<Self> {
        Self::new(Script::new(bytes.to_vec()))
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioBlob> {
        self.texts.lock().unwrap().push(text.to_string());
        let bytes = self.script.next().await?;
        Ok(AudioBlob::new(bytes, AudioEncoding::Mpeg))
    }
}

/// A session wired to fakes, with handles to inspect them
pub struct Harness {
    pub session: VoiceSession,
    pub capture: Arc<CaptureProbe>,
    pub transcriber: Arc<FakeTranscriber>,
    pub conversation: Arc<FakeConversation>,
    pub speech: Arc<FakeSpeech>,
}

impl Harness {
    pub fn new(
        capture: FakeCapture,
        transcriber: Arc<FakeTranscriber>,
        conversation: Arc<FakeConversation>,
        speech: Arc<FakeSpeech>,
    ) -> Self {
        Self::with_timeouts(capture, transcriber, conversation, speech, StageTimeouts::default())
    }

    pub fn with_timeouts(
        capture: FakeCapture,
        transcriber: Arc<FakeTranscriber>,
        conversation: Arc<FakeConversation>,
        speech: Arc<FakeSpeech>,
        timeouts: StageTimeouts,
    ) -> Self {
        let probe = capture.probe();
        let session = VoiceSessionBuilder::new(
            Box::new(capture),
            transcriber.clone(),
            conversation.clone(),
            speech.clone(),
        )
        .timeouts(timeouts)
        .build();

        Self {
            session,
            capture: probe,
            transcriber,
            conversation,
            speech,
        }
    }

    /// "hello" in, "hi there" out, speech succeeds
    pub fn happy() -> Self {
        Self::new(
            FakeCapture::with_audio(b"hello"),
            FakeTranscriber::replying("hello"),
            FakeConversation::replying("hi there"),
            FakeSpeech::ok(),
        )
    }
}

/// Role and content of each turn, for compact assertions
pub fn summarize(turns: &[Turn]) -> Vec<(String, String)> {
    turns
        .iter()
        .map(|t| (t.role.to_string(), t.content.clone()))
        .collect()
}

//! Audio capture from microphone

use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

use super::audio::{AudioBlob, AudioEncoding, SAMPLE_RATE, downmix, samples_to_wav};
use crate::{Error, Result};

/// Exclusive access to an input device, one recording at a time
///
/// The device is held only between `start_recording` and `stop_recording`
/// (or `release`). Implementations are driven by the session controller,
/// which never holds the device across the transcribe/complete/speak stages.
pub trait AudioCapture {
    /// Acquire the device and begin buffering audio
    ///
    /// # Errors
    ///
    /// `PermissionDenied`, `DeviceUnavailable`, or `AlreadyRecording`
    fn start_recording(&mut self) -> Result<()>;

    /// Release the device and flush everything buffered into one blob
    ///
    /// # Errors
    ///
    /// `NoActiveRecording` if nothing was started
    fn stop_recording(&mut self) -> Result<AudioBlob>;

    /// Drop any active recording and its buffered audio
    fn release(&mut self);

    /// Whether the device is currently held
    fn is_recording(&self) -> bool;
}

/// Shared sample buffer filled by the input callback
type SampleBuffer = Arc<Mutex<Vec<f32>>>;

/// An open input stream and the samples it has produced
///
/// Dropping it drops the stream handle, which releases the device.
struct Recording<S> {
    _stream: S,
    buffer: SampleBuffer,
}

/// At most one recording at a time, independent of the audio backend
///
/// `S` is the backend's stream handle; only its drop matters here.
struct RecordingSlot<S> {
    active: Option<Recording<S>>,
}

impl<S> RecordingSlot<S> {
    const fn new() -> Self {
        Self { active: None }
    }

    /// Open a stream through `open` and start buffering
    fn begin(&mut self, open: impl FnOnce(SampleBuffer) -> Result<S>) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::AlreadyRecording);
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let stream = open(Arc::clone(&buffer))?;
        self.active = Some(Recording {
            _stream: stream,
            buffer,
        });
        Ok(())
    }

    /// Close the stream and hand back everything it buffered
    fn finish(&mut self) -> Result<Vec<f32>> {
        let recording = self.active.take().ok_or(Error::NoActiveRecording)?;
        let samples = std::mem::take(&mut *lock(&recording.buffer));
        // Release the device before the caller encodes
        drop(recording);
        Ok(samples)
    }

    /// Drop any active recording; returns whether one was active
    fn release(&mut self) -> bool {
        self.active.take().is_some()
    }

    const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn buffer(&self) -> Option<&SampleBuffer> {
        self.active.as_ref().map(|rec| &rec.buffer)
    }
}

fn lock(buffer: &SampleBuffer) -> std::sync::MutexGuard<'_, Vec<f32>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encode one flushed recording as mono WAV
///
/// A recording that produced no samples becomes an empty blob, so it is
/// rejected as `EmptyAudio` by transcription instead of being uploaded as a
/// header-only WAV.
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn encode_recording(interleaved: &[f32], channels: u16, sample_rate: u32) -> Result<AudioBlob> {
    let samples = downmix(interleaved, channels);
    if samples.is_empty() {
        return Ok(AudioBlob::new(Vec::new(), AudioEncoding::Wav));
    }

    Ok(AudioBlob::new(
        samples_to_wav(&samples, sample_rate)?,
        AudioEncoding::Wav,
    ))
}

/// Captures audio from the default input device as 16-bit mono WAV
pub struct Microphone {
    input: InputDevice,
    slot: RecordingSlot<Stream>,
}

/// The selected input device and its stream configuration
struct InputDevice {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl InputDevice {
    /// Build and start an input stream feeding `buffer`
    fn open(&self, buffer: SampleBuffer) -> Result<Stream> {
        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(buffer)?,
            SampleFormat::I16 => self.build_stream::<i16>(buffer)?,
            SampleFormat::U16 => self.build_stream::<u16>(buffer)?,
            other => {
                return Err(Error::DeviceUnavailable(format!(
                    "unsupported sample format: {other:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        Ok(stream)
    }

    fn build_stream<T>(&self, buffer: SampleBuffer) -> Result<Stream>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        self.device
            .build_input_stream(
                &self.config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend(data.iter().map(|&s| f32::from_sample_(s)));
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| classify_device_error(&e.to_string()))
    }
}

impl Microphone {
    /// Open the default input device
    ///
    /// Prefers a mono 16kHz configuration, falling back to the device default.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if there is no usable input device
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let preferred = device
            .supported_input_configs()
            .map_err(|e| classify_device_error(&e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .map(|c| c.with_sample_rate(SampleRate(SAMPLE_RATE)));

        let supported_config = match preferred {
            Some(config) => config,
            None => device
                .default_input_config()
                .map_err(|e| classify_device_error(&e.to_string()))?,
        };

        let sample_format = supported_config.sample_format();
        let config = supported_config.config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            ?sample_format,
            "audio capture initialized"
        );

        Ok(Self {
            input: InputDevice {
                device,
                config,
                sample_format,
            },
            slot: RecordingSlot::new(),
        })
    }

    /// Sample rate of the encoded recordings
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.input.config.sample_rate.0
    }

    const fn channels(&self) -> u16 {
        self.input.config.channels
    }

    /// Mono samples buffered so far, without clearing them
    #[must_use]
    pub fn peek_samples(&self) -> Vec<f32> {
        self.slot
            .buffer()
            .map_or_else(Vec::new, |buffer| downmix(&lock(buffer), self.channels()))
    }

    /// Discard buffered samples while keeping the recording open
    pub fn clear_samples(&self) {
        if let Some(buffer) = self.slot.buffer() {
            lock(buffer).clear();
        }
    }
}

impl AudioCapture for Microphone {
    fn start_recording(&mut self) -> Result<()> {
        let input = &self.input;
        self.slot.begin(|buffer| input.open(buffer))?;

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<AudioBlob> {
        let interleaved = self.slot.finish()?;
        let blob = encode_recording(&interleaved, self.channels(), self.sample_rate())?;

        tracing::debug!(
            samples = interleaved.len(),
            bytes = blob.len(),
            "audio capture stopped"
        );
        Ok(blob)
    }

    fn release(&mut self) {
        if self.slot.release() {
            tracing::debug!("audio capture released");
        }
    }

    fn is_recording(&self) -> bool {
        self.slot.is_active()
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.release();
    }
}

/// Map a backend error message onto the capture error taxonomy
///
/// cpal reports OS permission refusals as backend-specific errors, so the
/// message text is the only signal available.
fn classify_device_error(message: &str) -> Error {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        Error::PermissionDenied(message.to_string())
    } else {
        Error::DeviceUnavailable(message.to_string())
    }
}

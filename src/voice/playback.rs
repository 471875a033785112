//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::audio::{AudioBlob, AudioEncoding, wav_to_samples};
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Plays audio to the default output device
#[derive(Debug, Clone)]
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.sample_format() == cpal::SampleFormat::F32
        };

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| c.channels() == 1 && supports_rate(c))
            .or_else(|| {
                // Fallback: try stereo
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| c.channels() == 2 && supports_rate(c))
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Play mono samples recorded at `PLAYBACK_SAMPLE_RATE`
    ///
    /// Returns once playback has finished. Dropping the returned future
    /// silences the output and closes the stream.
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play(&self, samples: Vec<f32>) -> Result<()> {
        let config = self.config.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let _stop_on_drop = StopOnDrop(Arc::clone(&stop));

        tokio::task::spawn_blocking(move || play_samples_blocking(&config, samples, stop))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    /// Decode and play an encoded blob
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub async fn play_blob(&self, blob: AudioBlob) -> Result<()> {
        let (samples, rate) = match blob.encoding() {
            AudioEncoding::Mpeg => decode_mp3(blob.as_bytes())?,
            AudioEncoding::Wav => wav_to_samples(blob.as_bytes())?,
            AudioEncoding::Webm => {
                return Err(Error::Audio("webm playback is not supported".to_string()));
            }
        };

        self.play(resample_linear(&samples, rate, PLAYBACK_SAMPLE_RATE))
            .await
    }
}

/// Raises the stop flag of a playback when dropped
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Feeds mono samples into interleaved output buffers
struct SampleFeed {
    samples: Vec<f32>,
    position: usize,
    finished: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl SampleFeed {
    fn new(samples: Vec<f32>, stop: Arc<AtomicBool>) -> Self {
        Self {
            samples,
            position: 0,
            finished: Arc::new(AtomicBool::new(false)),
            stop,
        }
    }

    /// Fill one output buffer; silence once exhausted or stopped
    fn fill(&mut self, data: &mut [f32], channels: usize) {
        if self.stop.load(Ordering::Acquire) {
            data.fill(0.0);
            self.finished.store(true, Ordering::Release);
            return;
        }

        for frame in data.chunks_mut(channels) {
            let sample = self.samples.get(self.position).copied().unwrap_or_else(|| {
                self.finished.store(true, Ordering::Release);
                0.0
            });
            frame.fill(sample);
            self.position = (self.position + 1).min(self.samples.len());
        }
    }
}

/// Block until the feed is drained, `stop` is raised, or `timeout` passes
///
/// Returns whether playback was stopped early.
fn wait_for_playback(finished: &AtomicBool, stop: &AtomicBool, timeout: Duration) -> bool {
    let start = Instant::now();

    while !finished.load(Ordering::Acquire) {
        if stop.load(Ordering::Acquire) || start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    stop.load(Ordering::Acquire)
}

/// Play samples in a blocking manner
fn play_samples_blocking(
    config: &StreamConfig,
    samples: Vec<f32>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let sample_count = samples.len();

    let mut feed = SampleFeed::new(samples, Arc::clone(&stop));
    let finished = Arc::clone(&feed.finished);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feed.fill(data, channels),
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    #[allow(clippy::cast_possible_truncation)]
    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let timeout = Duration::from_millis(duration_ms + 500);

    if wait_for_playback(&finished, &stop, timeout) {
        drop(stream);
        tracing::debug!(samples = sample_count, "playback stopped");
        return Ok(());
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(PLAYBACK_SAMPLE_RATE);
                let channels = frame.channels.max(1);
                // Average channels down to mono
                samples.extend(frame.data.chunks(channels).map(|chunk| {
                    let sum: f32 = chunk.iter().map(|&s| f32::from(s) / 32768.0).sum();
                    #[allow(clippy::cast_precision_loss)]
                    let len = chunk.len() as f32;
                    sum / len
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Linear-interpolation resampler, adequate for speech playback
fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() || from == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from) / f64::from(to);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let out_len = (samples.len() as f64 / ratio).round() as usize;

    (0..out_len)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let pos = i as f64 * ratio;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = pos.floor() as usize;
            #[allow(clippy::cast_possible_truncation)]
            let frac = (pos - pos.floor()) as f32;
            let a = samples.get(idx).copied().unwrap_or(0.0);
            let b = samples.get(idx + 1).copied().unwrap_or(a);
            (b - a).mul_add(frac, a)
        })
        .collect()
}

//! Encoded audio buffers passed between capture, providers and playback

use std::fmt;

use base64::Engine as _;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Container/codec of an [`AudioBlob`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioEncoding {
    /// 16-bit PCM WAV, produced by the microphone
    Wav,
    /// WebM/Opus, as uploaded by browser clients
    Webm,
    /// MP3, as returned by speech synthesis
    Mpeg,
}

impl AudioEncoding {
    /// MIME type
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Webm => "audio/webm",
            Self::Mpeg => "audio/mpeg",
        }
    }

    /// File extension used for multipart uploads
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Webm => "webm",
            Self::Mpeg => "mp3",
        }
    }

    /// Parse a MIME type, ignoring parameters such as `;codecs=opus`
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "audio/wav" | "audio/wave" | "audio/x-wav" => Some(Self::Wav),
            "audio/webm" | "video/webm" => Some(Self::Webm),
            "audio/mpeg" | "audio/mp3" => Some(Self::Mpeg),
            _ => None,
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Opaque encoded audio with its declared encoding
///
/// Ownership moves from the producer to the single consumer; blobs are never
/// cached or replayed.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioBlob {
    bytes: Vec<u8>,
    encoding: AudioEncoding,
}

impl AudioBlob {
    #[must_use]
    pub const fn new(bytes: Vec<u8>, encoding: AudioEncoding) -> Self {
        Self { bytes, encoding }
    }

    #[must_use]
    pub const fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Filename to use when uploading, e.g. `recording.wav`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("recording.{}", self.encoding.extension())
    }

    /// Encode as a `data:` URI
    #[must_use]
    pub fn to_data_uri(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{encoded}", self.encoding.mime())
    }

    /// Decode a base64 `data:` URI
    ///
    /// # Errors
    ///
    /// Returns error if the URI is malformed, not base64, or of an unknown audio type
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| Error::Audio("not a data URI".to_string()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::Audio("data URI has no payload".to_string()))?;
        let mime = meta
            .strip_suffix(";base64")
            .ok_or_else(|| Error::Audio("data URI is not base64".to_string()))?;
        let encoding = AudioEncoding::from_mime(mime)
            .ok_or_else(|| Error::Audio(format!("unsupported audio type: {mime}")))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| Error::Audio(format!("invalid base64 audio: {e}")))?;
        Ok(Self::new(bytes, encoding))
    }
}

impl fmt::Debug for AudioBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBlob")
            .field("encoding", &self.encoding)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode 16-bit PCM WAV bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the bytes are not a readable WAV stream
pub fn wav_to_samples(wav: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::new(std::io::Cursor::new(wav)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| f32::from(v) / 32768.0))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Audio(e.to_string()))?;

    Ok((downmix(&interleaved, spec.channels), spec.sample_rate))
}

/// Average interleaved frames down to a single channel
#[must_use]
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    let channels = usize::from(channels);
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

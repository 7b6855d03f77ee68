//! Decoded audio buffers and payload decoding
//!
//! The remote backend answers with base64 text wrapping one of three
//! containers: raw 16-bit little-endian PCM (the common case), WAV, or MP3.
//! All of them are decoded to mono f32 samples at the output rate.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;

use crate::SynthesisError;

/// Sample rate of the playback device and of every decoded buffer
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Immutable mono PCM audio
///
/// Samples sit behind an `Arc`, so clones are cheap and a caller can keep a
/// turn's buffers around for replay without copying them.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap mono samples recorded at `sample_rate`
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Silence of the given length at the output rate
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn silence(duration: Duration) -> Self {
        let frames = (duration.as_secs_f64() * f64::from(OUTPUT_SAMPLE_RATE)).round() as usize;
        Self::new(vec![0.0; frames], OUTPUT_SAMPLE_RATE)
    }

    /// Sample data
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the sample data
    #[must_use]
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Duration as a [`Duration`]
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}

/// Decode a base64 payload into a buffer at [`OUTPUT_SAMPLE_RATE`]
///
/// `mime_type` selects the container (`audio/mpeg`, `audio/wav`, or PCM for
/// anything else). A `rate=` parameter on a PCM MIME type is honored.
///
/// # Errors
///
/// Returns [`SynthesisError::DecodeFailure`] if the payload is not valid
/// base64, is empty, is malformed for its container, or was produced at a
/// sample rate other than the output rate
pub fn decode_payload(
    payload: &str,
    mime_type: Option<&str>,
) -> std::result::Result<AudioBuffer, SynthesisError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| SynthesisError::DecodeFailure(format!("invalid base64 payload: {e}")))?;

    if bytes.is_empty() {
        return Err(SynthesisError::DecodeFailure(
            "empty audio payload".to_string(),
        ));
    }

    let mime = mime_type.unwrap_or_default().to_lowercase();
    let (samples, sample_rate) = if mime.contains("mpeg") || mime.contains("mp3") {
        decode_mp3(&bytes)?
    } else if mime.contains("wav") {
        decode_wav(&bytes)?
    } else {
        (decode_pcm16(&bytes)?, pcm_rate(&mime))
    };

    if sample_rate != OUTPUT_SAMPLE_RATE {
        return Err(SynthesisError::DecodeFailure(format!(
            "payload sample rate {sample_rate} Hz does not match output rate {OUTPUT_SAMPLE_RATE} Hz"
        )));
    }

    if samples.is_empty() {
        return Err(SynthesisError::DecodeFailure(
            "payload contained no audio frames".to_string(),
        ));
    }

    Ok(AudioBuffer::new(samples, sample_rate))
}

/// Read `rate=NNNN` from a MIME type like `audio/L16;codec=pcm;rate=24000`
fn pcm_rate(mime: &str) -> u32 {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
        .unwrap_or(OUTPUT_SAMPLE_RATE)
}

/// Decode signed 16-bit little-endian mono PCM
fn decode_pcm16(bytes: &[u8]) -> std::result::Result<Vec<f32>, SynthesisError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(SynthesisError::DecodeFailure(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// Decode a WAV container, folding stereo to mono
fn decode_wav(bytes: &[u8]) -> std::result::Result<(Vec<f32>, u32), SynthesisError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| SynthesisError::DecodeFailure(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let interleaved: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|s| f32::from(s) / 32768.0))
            .collect(),
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
    };
    let interleaved = interleaved
        .map_err(|e| SynthesisError::DecodeFailure(format!("WAV decode error: {e}")))?;

    Ok((downmix(&interleaved, usize::from(spec.channels)), spec.sample_rate))
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> std::result::Result<(Vec<f32>, u32), SynthesisError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate.get_or_insert(frame.sample_rate);
                let interleaved: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&interleaved, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => {
                return Err(SynthesisError::DecodeFailure(format!(
                    "MP3 decode error: {e}"
                )));
            }
        }
    }

    let sample_rate = sample_rate
        .and_then(|r| u32::try_from(r).ok())
        .unwrap_or(OUTPUT_SAMPLE_RATE);

    Ok((samples, sample_rate))
}

/// Average interleaved channels into one
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

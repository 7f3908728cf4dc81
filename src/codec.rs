//! Conversion between float PCM and the base64 16-bit wire representation.

use crate::error::{LiveError, Result};
use base64::Engine;
use std::ops::RangeInclusive;

pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Rates accepted from an inbound MIME descriptor
pub const ACCEPTED_RATES: RangeInclusive<u32> = 8_000..=192_000;

/// Base64 text of 16-bit little-endian PCM, tagged with its MIME descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBlob {
    pub data: String,
    pub mime_type: String,
}

/// Decoded mono or interleaved float audio ready for scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert f32 samples to PCM 16-bit little-endian bytes
pub fn samples_to_pcm(samples: &[f32]) -> Vec<u8> {
    let mut pcm_data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        pcm_data.extend_from_slice(&sample_i16.to_le_bytes());
    }
    pcm_data
}

/// Convert PCM 16-bit little-endian bytes back to f32 samples
pub fn pcm_to_samples(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(LiveError::ProtocolDecode(format!(
            "odd PCM byte length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Encode a captured frame for transmission
pub fn encode_frame(samples: &[f32]) -> EncodedBlob {
    let pcm = samples_to_pcm(samples);
    EncodedBlob {
        data: base64::engine::general_purpose::STANDARD.encode(pcm),
        mime_type: INPUT_MIME_TYPE.to_string(),
    }
}

/// Decode an inbound audio payload into a mono buffer at `sample_rate`
pub fn decode_audio(data: &str, sample_rate: u32) -> Result<PcmBuffer> {
    if sample_rate == 0 {
        return Err(LiveError::ProtocolDecode("zero sample rate".to_string()));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| LiveError::ProtocolDecode(format!("invalid base64: {}", e)))?;
    let samples = pcm_to_samples(&bytes)?;
    Ok(PcmBuffer::new(samples, sample_rate, 1))
}

/// Read the `rate=` parameter of a PCM MIME descriptor. Missing, unparsable,
/// and out-of-range rates all yield `None`.
pub fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
        .filter(|rate| ACCEPTED_RATES.contains(rate))
}

/// Root-mean-square loudness of a frame
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

//! Microphone capture: the input seam, the per-frame capture unit, and the
//! cpal backend.

use crate::codec::{self, EncodedBlob};
use crate::error::{LiveError, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

mod imp_cpal;

pub use imp_cpal::{list_input_devices, CpalMicrophone};

/// Samples per capture frame (256ms at 16kHz)
pub const FRAME_SAMPLES: usize = 4096;

/// Gain applied to RMS before clamping to the 0..=1 volume range
pub const VOLUME_GAIN: f32 = 5.0;

/// How long a device may take to start streaming
pub const DEVICE_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolves once a device stream is running, or with the reason it could not start
pub type DeviceReady = oneshot::Receiver<Result<()>>;

/// Wait for a device handed out by `open` to start, bounded by [`DEVICE_STARTUP_TIMEOUT`]
pub async fn wait_ready(ready: DeviceReady, device: &str) -> Result<()> {
    match tokio::time::timeout(DEVICE_STARTUP_TIMEOUT, ready).await {
        Ok(Ok(started)) => started,
        Ok(Err(_)) => Err(LiveError::Audio(format!(
            "The {} stopped before it started",
            device
        ))),
        Err(_) => Err(LiveError::Audio(format!(
            "Timed out waiting for the {} to start",
            device
        ))),
    }
}

/// Capture device configuration
#[derive(Debug, Clone, Default)]
pub struct AudioCaptureConfig {
    /// Device name to capture from (None = default device)
    pub device_name: Option<String>,
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub channel_count: u32,
    pub sample_rate: u32,
}

/// A source of fixed-size 16kHz mono frames
pub trait AudioInput: Send {
    /// Begin acquiring the device without waiting for it. Frames arrive on
    /// the receiver once the returned [`DeviceReady`] resolves with `Ok`.
    fn open(&mut self) -> Result<(mpsc::Receiver<Vec<f32>>, DeviceReady)>;

    fn is_open(&self) -> bool;

    /// Release the device. Safe to call when already closed.
    fn close(&mut self);
}

/// Result of processing one captured frame
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Normalised loudness for UI metering, 0..=1
    pub volume: f32,
    pub blob: EncodedBlob,
}

/// Turns raw frames into a volume signal and an encoded payload
#[derive(Debug, Default)]
pub struct CaptureUnit {
    frames_processed: u64,
}

impl CaptureUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_frame(&mut self, input: &[f32]) -> CapturedFrame {
        self.frames_processed += 1;
        let volume = (codec::rms(input) * VOLUME_GAIN).min(1.0);
        if self.frames_processed % 100 == 0 {
            log::trace!(
                "Capture: {} frames processed (volume {:.3})",
                self.frames_processed,
                volume
            );
        }

        CapturedFrame {
            volume,
            blob: codec::encode_frame(input),
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }
}

/// Map a backend error message onto the startup error taxonomy
pub fn classify_device_error(message: &str) -> LiveError {
    let lowered = message.to_lowercase();
    if ["permission", "denied", "not permitted", "not authorized", "unauthorized"]
        .iter()
        .any(|m| lowered.contains(m))
    {
        LiveError::PermissionDenied(message.to_string())
    } else if ["no longer available", "not available", "not found", "no such", "no default"]
        .iter()
        .any(|m| lowered.contains(m))
    {
        LiveError::DeviceNotFound(message.to_string())
    } else {
        LiveError::Audio(message.to_string())
    }
}

use super::{
    classify_device_error, AudioCaptureConfig, AudioDeviceInfo, AudioInput, DeviceReady,
    FRAME_SAMPLES,
};
use crate::codec::CAPTURE_SAMPLE_RATE;
use crate::error::{LiveError, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream,
};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};

// Hardware samples fed to the resampler per call
const RESAMPLER_CHUNK: usize = 1024;
const FRAME_QUEUE: usize = 32;

struct CaptureThread {
    stop_sender: std_mpsc::Sender<()>,
    /// Set once the thread is past device startup
    settled: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// cpal microphone delivering 4096-sample frames at 16kHz mono.
///
/// The cpal stream lives on its own thread. `open` returns as soon as that
/// thread is spawned; the thread reports whether the device started through
/// the returned [`DeviceReady`].
pub struct CpalMicrophone {
    config: AudioCaptureConfig,
    running: Option<CaptureThread>,
}

impl CpalMicrophone {
    pub fn new(config: AudioCaptureConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    fn run_capture_thread(
        config: AudioCaptureConfig,
        frames: mpsc::Sender<Vec<f32>>,
        ready: oneshot::Sender<Result<()>>,
        settled: Arc<AtomicBool>,
        stop_receiver: std_mpsc::Receiver<()>,
    ) {
        let started = Self::start_stream(&config, frames);
        settled.store(true, Ordering::Release);
        let stream = match started {
            Ok(stream) => {
                log::info!("🎤 Capture: Microphone open");
                let _ = ready.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        // Blocks until close() or the microphone handle is dropped
        let _ = stop_receiver.recv();
        drop(stream);
        log::info!("🎤 Capture: Stream released");
    }

    fn start_stream(
        config: &AudioCaptureConfig,
        frames: mpsc::Sender<Vec<f32>>,
    ) -> Result<CpalStream> {
        let host = cpal::default_host();
        log::info!("🎤 Capture: Initializing with host {:?}", host.id());

        let device = if let Some(name) = &config.device_name {
            host.input_devices()
                .map_err(|e| classify_device_error(&e.to_string()))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| LiveError::DeviceNotFound(format!("Device not found: {}", name)))?
        } else {
            host.default_input_device()
                .ok_or_else(|| LiveError::DeviceNotFound("No default input device found".into()))?
        };

        log::info!("🎤 Capture: Using input device {:?}", device.name());

        let supported_config = match Self::select_input_config(&device) {
            Ok(config) => config,
            Err(err) => {
                log::warn!(
                    "Capture: No preferred input config ({}), falling back to default",
                    err
                );
                device
                    .default_input_config()
                    .map_err(|e| classify_device_error(&e.to_string()))?
            }
        };

        let stream_config = supported_config.config();
        let hardware_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels as usize;

        log::info!(
            "🎤 Capture: Hardware {}Hz, {} channels, {:?} → 16kHz mono",
            hardware_rate,
            channels,
            supported_config.sample_format()
        );

        let resampler = if hardware_rate != CAPTURE_SAMPLE_RATE {
            let ratio = CAPTURE_SAMPLE_RATE as f64 / hardware_rate as f64;
            let params = SincInterpolationParameters {
                sinc_len: 32,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLER_CHUNK, 1)
                .map_err(|e| LiveError::Audio(format!("Resampler setup failed: {}", e)))?;
            log::info!(
                "Capture: Resampling {}Hz → 16kHz (ratio {:.3})",
                hardware_rate,
                ratio
            );
            Some(resampler)
        } else {
            None
        };

        let stream = match supported_config.sample_format() {
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &stream_config, channels, frames, resampler)?
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &stream_config, channels, frames, resampler)?
            }
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &stream_config, channels, frames, resampler)?
            }
            other => {
                return Err(LiveError::Audio(format!(
                    "Unsupported sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        Ok(stream)
    }

    fn select_input_config(device: &Device) -> Result<cpal::SupportedStreamConfig> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| classify_device_error(&e.to_string()))?;

        let mut best_config: Option<cpal::SupportedStreamConfig> = None;
        let mut best_format_rank = u8::MAX;
        let mut best_rate_diff = u32::MAX;

        for config_range in configs {
            let format_rank = match config_range.sample_format() {
                SampleFormat::F32 => 0,
                SampleFormat::I16 => 1,
                SampleFormat::U16 => 2,
                _ => continue,
            };

            let chosen_rate = CAPTURE_SAMPLE_RATE.clamp(
                config_range.min_sample_rate().0,
                config_range.max_sample_rate().0,
            );
            let rate_diff = chosen_rate.abs_diff(CAPTURE_SAMPLE_RATE);

            if rate_diff < best_rate_diff
                || (rate_diff == best_rate_diff && format_rank < best_format_rank)
            {
                best_format_rank = format_rank;
                best_rate_diff = rate_diff;
                best_config = Some(config_range.with_sample_rate(cpal::SampleRate(chosen_rate)));
            }
        }

        best_config.ok_or_else(|| LiveError::Audio("No supported input configs found".into()))
    }

    fn build_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        channels: usize,
        frames: mpsc::Sender<Vec<f32>>,
        mut resampler: Option<SincFixedIn<f32>>,
    ) -> Result<CpalStream>
    where
        T: Sample + SizedSample + Send + Sync + 'static,
        f32: FromSample<T>,
    {
        let mut hardware_buffer: Vec<f32> = Vec::with_capacity(RESAMPLER_CHUNK * 2);
        let mut frame_buffer: Vec<f32> = Vec::with_capacity(FRAME_SAMPLES * 2);
        let mut dropped: u64 = 0;

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    // Channel 0 only
                    for frame in data.chunks(channels) {
                        if let Some(s) = frame.first() {
                            hardware_buffer.push(f32::from_sample(*s));
                        }
                    }

                    match resampler.as_mut() {
                        Some(r) => {
                            while hardware_buffer.len() >= RESAMPLER_CHUNK {
                                let chunk: Vec<f32> =
                                    hardware_buffer.drain(..RESAMPLER_CHUNK).collect();
                                match r.process(&[chunk], None) {
                                    Ok(mut out) => frame_buffer.append(&mut out[0]),
                                    Err(e) => log::error!("Capture: Resampling error: {}", e),
                                }
                            }
                        }
                        None => frame_buffer.append(&mut hardware_buffer),
                    }

                    while frame_buffer.len() >= FRAME_SAMPLES {
                        let frame: Vec<f32> = frame_buffer.drain(..FRAME_SAMPLES).collect();
                        // Never block the audio thread; a full queue drops the frame
                        if frames.try_send(frame).is_err() {
                            dropped += 1;
                            if dropped % 10 == 1 {
                                log::warn!("Capture: Frame queue full, {} frames dropped", dropped);
                            }
                        }
                    }
                },
                |err| log::error!("Capture: Stream error: {}", err),
                None,
            )
            .map_err(|e| classify_device_error(&e.to_string()))
    }
}

impl AudioInput for CpalMicrophone {
    fn open(&mut self) -> Result<(mpsc::Receiver<Vec<f32>>, DeviceReady)> {
        self.close();

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_sender, stop_receiver) = std_mpsc::channel();
        let settled = Arc::new(AtomicBool::new(false));
        let config = self.config.clone();
        let thread_settled = Arc::clone(&settled);

        let handle = thread::spawn(move || {
            Self::run_capture_thread(config, frame_tx, ready_tx, thread_settled, stop_receiver);
        });

        self.running = Some(CaptureThread {
            stop_sender,
            settled,
            handle,
        });
        Ok((frame_rx, ready_rx))
    }

    fn is_open(&self) -> bool {
        self.running.is_some()
    }

    fn close(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_sender.send(());
            if !running.settled.load(Ordering::Acquire) {
                log::warn!("Capture: Microphone still starting, detaching its thread");
            } else if running.handle.join().is_err() {
                log::error!("Capture: Capture thread panicked");
            }
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.close();
    }
}

/// List available input devices
pub fn list_input_devices() -> Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| classify_device_error(&e.to_string()))?;
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut infos = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else { continue };
        let Ok(config) = device.default_input_config() else {
            continue;
        };
        infos.push(AudioDeviceInfo {
            is_default: default_name.as_ref() == Some(&name),
            name,
            channel_count: config.channels() as u32,
            sample_rate: config.sample_rate().0,
        });
    }
    Ok(infos)
}

use super::{AudioOutput, ChunkId};
use crate::audio_capture::{classify_device_error, AudioDeviceInfo, DeviceReady};
use crate::codec::PcmBuffer;
use crate::error::{LiveError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Default)]
pub struct CpalOutputConfig {
    /// Device name to play on (None = default device)
    pub device_name: Option<String>,
}

struct TimedChunk {
    id: ChunkId,
    start_frame: u64,
    /// Mono samples already converted to the device rate
    samples: Vec<f32>,
}

impl TimedChunk {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Shared between the audio callback and the scheduler side
struct Timeline {
    rendered_frames: u64,
    device_rate: u32,
    chunks: Vec<TimedChunk>,
}

impl Timeline {
    /// Mix the next `mix.len()` frames and retire the chunks that finished
    /// inside them. Only scheduled chunks are rendered; the output carries no
    /// other signal.
    fn render(&mut self, mix: &mut [f32], ended: &mpsc::UnboundedSender<ChunkId>) {
        mix.fill(0.0);
        let window_start = self.rendered_frames;
        let window_end = window_start + mix.len() as u64;

        for chunk in &self.chunks {
            let from = chunk.start_frame.max(window_start);
            let to = chunk.end_frame().min(window_end);
            for frame in from..to {
                mix[(frame - window_start) as usize] +=
                    chunk.samples[(frame - chunk.start_frame) as usize];
            }
        }

        self.rendered_frames = window_end;
        self.chunks.retain(|chunk| {
            if chunk.end_frame() <= window_end {
                let _ = ended.send(chunk.id);
                false
            } else {
                true
            }
        });
    }
}

struct OutputThread {
    stop_sender: std_mpsc::Sender<()>,
    /// Set once the thread is past device startup
    settled: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// cpal output that mixes chunks at absolute positions on a frame counter.
///
/// The device clock is the number of frames the callback has rendered since
/// `open`; chunks are placed on it by start time and report completion once
/// the counter passes their last frame.
pub struct CpalOutput {
    config: CpalOutputConfig,
    timeline: Arc<Mutex<Timeline>>,
    running: Option<OutputThread>,
}

fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CpalOutput {
    pub fn new(config: CpalOutputConfig) -> Self {
        Self {
            config,
            timeline: Arc::new(Mutex::new(Timeline {
                rendered_frames: 0,
                device_rate: 0,
                chunks: Vec::new(),
            })),
            running: None,
        }
    }

    fn run_output_thread(
        config: CpalOutputConfig,
        timeline: Arc<Mutex<Timeline>>,
        ended: mpsc::UnboundedSender<ChunkId>,
        ready: oneshot::Sender<Result<()>>,
        settled: Arc<AtomicBool>,
        stop_receiver: std_mpsc::Receiver<()>,
    ) {
        let started = Self::start_stream(&config, timeline, ended);
        settled.store(true, Ordering::Release);
        let stream = match started {
            Ok(stream) => {
                log::info!("🔊 Playback: Output open");
                let _ = ready.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let _ = stop_receiver.recv();
        drop(stream);
        log::info!("🔊 Playback: Stream released");
    }

    fn start_stream(
        config: &CpalOutputConfig,
        timeline: Arc<Mutex<Timeline>>,
        ended: mpsc::UnboundedSender<ChunkId>,
    ) -> Result<CpalStream> {
        let host = cpal::default_host();

        let device = if let Some(name) = &config.device_name {
            host.output_devices()
                .map_err(|e| classify_device_error(&e.to_string()))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| LiveError::DeviceNotFound(format!("Device not found: {}", name)))?
        } else {
            host.default_output_device()
                .ok_or_else(|| LiveError::DeviceNotFound("No output device found".into()))?
        };

        log::info!("🔊 Playback: Using output device {:?}", device.name());

        let supported_config = device
            .default_output_config()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        let stream_config = supported_config.config();
        let channels = stream_config.channels as usize;

        {
            let mut state = lock(&timeline);
            state.device_rate = stream_config.sample_rate.0;
            state.rendered_frames = 0;
            state.chunks.clear();
        }

        log::info!(
            "🔊 Playback: Hardware {}Hz, {} channels, {:?}",
            stream_config.sample_rate.0,
            channels,
            supported_config.sample_format()
        );

        let stream = match supported_config.sample_format() {
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &stream_config, channels, timeline, ended)?
            }
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &stream_config, channels, timeline, ended)?
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &stream_config, channels, timeline, ended)?
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

    fn build_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        channels: usize,
        timeline: Arc<Mutex<Timeline>>,
        ended: mpsc::UnboundedSender<ChunkId>,
    ) -> Result<CpalStream>
    where
        T: Sample + SizedSample + FromSample<f32> + Send + 'static,
    {
        let mut mix: Vec<f32> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    mix.resize(data.len() / channels.max(1), 0.0);
                    lock(&timeline).render(&mut mix, &ended);

                    for (frame, sample) in data.chunks_mut(channels.max(1)).zip(mix.iter()) {
                        let value = T::from_sample(sample.clamp(-1.0, 1.0));
                        for out in frame.iter_mut() {
                            *out = value;
                        }
                    }
                },
                |err| log::error!("Playback: Stream error: {}", err),
                None,
            )
            .map_err(|e| classify_device_error(&e.to_string()))
    }
}

/// Linear interpolation to the device rate, mixing channels down to mono
fn to_device_rate(buffer: &PcmBuffer, device_rate: u32) -> Vec<f32> {
    let channels = buffer.channels.max(1) as usize;
    let mono: Vec<f32> = buffer
        .samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    // A zero rate on either side has no meaningful ratio
    if buffer.sample_rate == device_rate
        || buffer.sample_rate == 0
        || device_rate == 0
        || mono.is_empty()
    {
        return mono;
    }

    let step = buffer.sample_rate as f64 / device_rate as f64;
    let out_len = (mono.len() as f64 / step).round() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            let fract = (pos - idx as f64) as f32;
            let a = mono.get(idx).copied().unwrap_or(0.0);
            let b = mono.get(idx + 1).copied().unwrap_or(a);
            a * (1.0 - fract) + b * fract
        })
        .collect()
}

impl AudioOutput for CpalOutput {
    fn open(&mut self) -> Result<(mpsc::UnboundedReceiver<ChunkId>, DeviceReady)> {
        self.close();

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_sender, stop_receiver) = std_mpsc::channel();
        let settled = Arc::new(AtomicBool::new(false));
        let config = self.config.clone();
        let timeline = Arc::clone(&self.timeline);
        let thread_settled = Arc::clone(&settled);

        let handle = thread::spawn(move || {
            Self::run_output_thread(
                config,
                timeline,
                ended_tx,
                ready_tx,
                thread_settled,
                stop_receiver,
            );
        });

        self.running = Some(OutputThread {
            stop_sender,
            settled,
            handle,
        });
        Ok((ended_rx, ready_rx))
    }

    fn is_open(&self) -> bool {
        self.running.is_some()
    }

    fn current_time(&self) -> f64 {
        let state = lock(&self.timeline);
        if state.device_rate == 0 {
            return 0.0;
        }
        state.rendered_frames as f64 / state.device_rate as f64
    }

    fn schedule(&mut self, id: ChunkId, buffer: &PcmBuffer, start_at: f64) -> Result<()> {
        if self.running.is_none() {
            return Err(LiveError::Audio("Output device is not open".into()));
        }

        let mut state = lock(&self.timeline);
        let samples = to_device_rate(buffer, state.device_rate);
        let start_frame = (start_at.max(0.0) * state.device_rate as f64).round() as u64;
        state.chunks.push(TimedChunk {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn cancel(&mut self, id: ChunkId) {
        lock(&self.timeline).chunks.retain(|chunk| chunk.id != id);
    }

    fn close(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_sender.send(());
            if !running.settled.load(Ordering::Acquire) {
                // Joining would wait on a device that may never answer
                log::warn!("Playback: Output still starting, detaching its thread");
            } else if running.handle.join().is_err() {
                log::error!("Playback: Output thread panicked");
            }
            lock(&self.timeline).chunks.clear();
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// List available output devices
pub fn list_output_devices() -> Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| classify_device_error(&e.to_string()))?;
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut infos = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else { continue };
        let Ok(config) = device.default_output_config() else {
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

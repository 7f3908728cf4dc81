//! In-memory transport and audio devices for driving the session controller

#![allow(dead_code)]

use live_voice::audio_capture::{AudioInput, DeviceReady};
use live_voice::codec::{EncodedBlob, PcmBuffer};
use live_voice::config::SessionConfig;
use live_voice::error::{LiveError, Result};
use live_voice::playback::{AudioOutput, ChunkId};
use live_voice::protocol::SessionSetup;
use live_voice::transport::{LiveLink, LiveTransport, TransportEvent};
use live_voice::{SessionController, SessionUpdate};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

#[derive(Debug, Clone)]
pub enum Outcome {
    /// Connect succeeds and the remote confirms setup
    Open,
    /// Connect succeeds but setup is never confirmed
    Silent,
    Fail(LiveError),
}

#[derive(Default)]
pub struct RemoteState {
    pub connects: usize,
    pub outcomes: VecDeque<Outcome>,
    pub setups: Vec<SessionSetup>,
    pub sent: Vec<EncodedBlob>,
    pub closed_links: usize,
    pub sessions: Vec<mpsc::Sender<TransportEvent>>,
}

pub struct FakeTransport(pub Arc<Mutex<RemoteState>>);

#[async_trait::async_trait]
impl LiveTransport for FakeTransport {
    async fn connect(
        &self,
        setup: &SessionSetup,
    ) -> Result<(Box<dyn LiveLink>, mpsc::Receiver<TransportEvent>)> {
        let mut remote = self.0.lock().unwrap();
        remote.connects += 1;
        remote.setups.push(setup.clone());

        match remote.outcomes.pop_front().unwrap_or(Outcome::Open) {
            Outcome::Fail(e) => Err(e),
            outcome => {
                let (tx, rx) = mpsc::channel(64);
                if matches!(outcome, Outcome::Open) {
                    tx.try_send(TransportEvent::Open).unwrap();
                }
                remote.sessions.push(tx);
                let link = FakeLink {
                    remote: Arc::clone(&self.0),
                    closed: false,
                };
                Ok((Box::new(link), rx))
            }
        }
    }
}

pub struct FakeLink {
    remote: Arc<Mutex<RemoteState>>,
    closed: bool,
}

impl LiveLink for FakeLink {
    fn send_audio(&self, blob: EncodedBlob) -> Result<()> {
        if self.closed {
            return Err(LiveError::Send("closed".to_string()));
        }
        self.remote.lock().unwrap().sent.push(blob);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.remote.lock().unwrap().closed_links += 1;
        }
    }
}

#[derive(Default)]
pub struct InputState {
    pub opens: usize,
    pub closes: usize,
    pub open: bool,
    /// Refuse in `open` itself
    pub fail: Option<LiveError>,
    /// Open, then report this error once the device would have started
    pub start_error: Option<LiveError>,
    /// Keep the device starting until `release_start` is called
    pub hold_start: bool,
    pub pending_start: Option<oneshot::Sender<Result<()>>>,
    pub frames: Option<mpsc::Sender<Vec<f32>>>,
}

impl InputState {
    pub fn release_start(&mut self, outcome: Result<()>) {
        if let Some(ready) = self.pending_start.take() {
            let _ = ready.send(outcome);
        }
    }
}

pub struct FakeInput(pub Arc<Mutex<InputState>>);

impl AudioInput for FakeInput {
    fn open(&mut self) -> Result<(mpsc::Receiver<Vec<f32>>, DeviceReady)> {
        let mut state = self.0.lock().unwrap();
        if let Some(e) = state.fail.clone() {
            return Err(e);
        }
        let (tx, rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = oneshot::channel();
        state.opens += 1;
        state.open = true;
        state.frames = Some(tx);
        if state.hold_start {
            state.pending_start = Some(ready_tx);
        } else {
            let outcome = match state.start_error.clone() {
                Some(e) => Err(e),
                None => Ok(()),
            };
            let _ = ready_tx.send(outcome);
        }
        Ok((rx, ready_rx))
    }

    fn is_open(&self) -> bool {
        self.0.lock().unwrap().open
    }

    fn close(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.closes += 1;
        state.open = false;
        state.frames = None;
    }
}

#[derive(Default)]
pub struct OutputState {
    pub opens: usize,
    pub closes: usize,
    pub open: bool,
    pub now: f64,
    pub scheduled: Vec<(ChunkId, f64)>,
    pub cancelled: Vec<ChunkId>,
    pub ended: Option<mpsc::UnboundedSender<ChunkId>>,
}

pub struct FakeOutput(pub Arc<Mutex<OutputState>>);

impl AudioOutput for FakeOutput {
    fn open(&mut self) -> Result<(mpsc::UnboundedReceiver<ChunkId>, DeviceReady)> {
        let mut state = self.0.lock().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let _ = ready_tx.send(Ok(()));
        state.opens += 1;
        state.open = true;
        state.ended = Some(tx);
        Ok((rx, ready_rx))
    }

    fn is_open(&self) -> bool {
        self.0.lock().unwrap().open
    }

    fn current_time(&self) -> f64 {
        self.0.lock().unwrap().now
    }

    fn schedule(&mut self, id: ChunkId, _buffer: &PcmBuffer, start_at: f64) -> Result<()> {
        self.0.lock().unwrap().scheduled.push((id, start_at));
        Ok(())
    }

    fn cancel(&mut self, id: ChunkId) {
        self.0.lock().unwrap().cancelled.push(id);
    }

    fn close(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.closes += 1;
        state.open = false;
        state.ended = None;
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub remote: Arc<Mutex<RemoteState>>,
    pub input: Arc<Mutex<InputState>>,
    pub output: Arc<Mutex<OutputState>>,
    pub updates: broadcast::Receiver<SessionUpdate>,
}

impl Harness {
    pub fn new(config: SessionConfig) -> Self {
        let remote = Arc::new(Mutex::new(RemoteState::default()));
        let input = Arc::new(Mutex::new(InputState::default()));
        let output = Arc::new(Mutex::new(OutputState::default()));

        let controller = SessionController::new(
            config,
            Arc::new(FakeTransport(Arc::clone(&remote))),
            Box::new(FakeInput(Arc::clone(&input))),
            Box::new(FakeOutput(Arc::clone(&output))),
        );
        let updates = controller.subscribe();

        Self {
            controller,
            remote,
            input,
            output,
            updates,
        }
    }

    /// Let spawned tasks run and handle everything they queued
    pub async fn settle(&mut self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
            while self.controller.try_step() {}
        }
    }

    /// Move the paused clock forward, settling along the way
    pub async fn advance(&mut self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.settle().await;
        }
    }

    pub async fn connected(config: SessionConfig) -> Self {
        let mut harness = Self::new(config);
        harness.controller.start();
        harness.settle().await;
        assert_eq!(
            harness.controller.state(),
            live_voice::ConnectionState::Connected
        );
        harness
    }

    /// Deliver an event on the most recent remote session. Events sent after
    /// the controller let go of that session are dropped.
    pub fn inject(&self, event: TransportEvent) {
        let remote = self.remote.lock().unwrap();
        let _ = remote.sessions.last().expect("no session").try_send(event);
    }

    pub fn push_frame(&self, samples: Vec<f32>) {
        let input = self.input.lock().unwrap();
        input
            .frames
            .as_ref()
            .expect("microphone not open")
            .try_send(samples)
            .unwrap();
    }

    pub fn end_chunk(&self, id: ChunkId) {
        let output = self.output.lock().unwrap();
        output
            .ended
            .as_ref()
            .expect("output not open")
            .send(id)
            .unwrap();
    }

    pub fn drain_updates(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            updates.push(update);
        }
        updates
    }
}

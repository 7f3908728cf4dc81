//! The session controller: owns the remote session and the audio devices,
//! and drives them from a single event queue.
//!
//! Commands, connect results, transport events, capture frames, playback
//! completions, and retry timers all arrive on one queue and are handled one
//! at a time, so no state is shared with the tasks that feed it. Each spawned
//! task tags its events with the session generation it belongs to; bumping
//! the generation on teardown fences off anything still in flight.

pub mod events;

use crate::audio_capture::{wait_ready, AudioInput, CaptureUnit};
use crate::codec::{self, PLAYBACK_SAMPLE_RATE};
use crate::config::{SessionConfig, TranscriptGate};
use crate::error::LiveError;
use crate::playback::{AudioOutput, ChunkId, PlaybackScheduler};
use crate::protocol::{ServerEvent, SessionSetup};
use crate::signals::{detect_mood, Mood, WakeDetector};
use crate::transcript::{TranscriptAggregator, TranscriptHistory};
use crate::transport::{LiveLink, LiveTransport, TransportEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use events::{Command, ConnectionState, SessionUpdate};
use events::ControllerEvent;

const UPDATE_CAPACITY: usize = 256;

/// Cloneable handle for sending commands to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl ControllerHandle {
    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn set_online(&self, online: bool) {
        self.send(Command::SetOnline(online));
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    fn send(&self, command: Command) {
        if self.events.send(ControllerEvent::Command(command)).is_err() {
            log::warn!("Session: Controller is gone, dropping {:?}", command);
        }
    }
}

pub struct SessionController {
    config: SessionConfig,
    transport: Arc<dyn LiveTransport>,
    input: Box<dyn AudioInput>,
    playback: PlaybackScheduler,
    capture: CaptureUnit,
    transcripts: TranscriptAggregator,
    wake: WakeDetector,
    history: TranscriptHistory,

    state: ConnectionState,
    online: bool,
    retries: u32,
    generation: u64,
    /// Generation of the connect attempt in flight, if any
    pending_start: Option<u64>,
    link: Option<Box<dyn LiveLink>>,
    /// Held from device open until the remote session opens
    frames: Option<mpsc::Receiver<Vec<f32>>>,
    session_token: CancellationToken,
    retry_timer: Option<JoinHandle<()>>,

    speaking: bool,
    awake: bool,
    volume: f32,
    mood: Mood,
    turn_mood: Option<Mood>,
    last_error: Option<LiveError>,

    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn LiveTransport>,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let wake = WakeDetector::new(&config.wake.phrases);

        Self {
            config,
            transport,
            input,
            playback: PlaybackScheduler::new(output),
            capture: CaptureUnit::new(),
            transcripts: TranscriptAggregator::new(),
            wake,
            history: TranscriptHistory::default(),
            state: ConnectionState::Idle,
            online: true,
            retries: 0,
            generation: 0,
            pending_start: None,
            link: None,
            frames: None,
            session_token: CancellationToken::new(),
            retry_timer: None,
            speaking: false,
            awake: false,
            volume: 0.0,
            mood: Mood::Neutral,
            turn_mood: None,
            last_error: None,
            events_tx,
            events_rx,
            updates,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            events: self.events_tx.clone(),
            updates: self.updates.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Process events until a shutdown command arrives
    pub async fn run(&mut self) {
        log::info!("Session: Controller running");
        while let Some(event) = self.events_rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        log::info!("Session: Controller stopped");
    }

    /// Handle one queued event without waiting. Returns false when the queue is empty.
    pub fn try_step(&mut self) -> bool {
        match self.events_rx.try_recv() {
            Ok(event) => {
                self.handle_event(event);
                true
            }
            Err(_) => false,
        }
    }

    fn handle_event(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Command(Command::Start) => self.start(),
            ControllerEvent::Command(Command::Stop) => self.stop(),
            ControllerEvent::Command(Command::SetOnline(online)) => self.set_online(online),
            ControllerEvent::Command(Command::Shutdown) => {
                self.stop();
                return false;
            }
            ControllerEvent::DeviceFailed { generation, error } => {
                if generation == self.generation {
                    log::error!("Session: Audio device failed to start: {}", error);
                    self.fail_terminal(error);
                }
            }
            ControllerEvent::Connected { generation, result } => {
                self.on_connected(generation, result)
            }
            ControllerEvent::Transport { generation, event } => {
                if generation == self.generation {
                    self.on_transport_event(event);
                }
            }
            ControllerEvent::Frame {
                generation,
                samples,
            } => {
                if generation == self.generation {
                    self.on_frame(&samples);
                }
            }
            ControllerEvent::ChunkEnded { generation, id } => {
                if generation == self.generation {
                    self.on_chunk_ended(id);
                }
            }
            ControllerEvent::RetryDue { generation } => {
                if generation == self.generation && self.state == ConnectionState::Reconnecting {
                    self.retry_timer = None;
                    log::info!(
                        "Session: Reconnect attempt {}/{}",
                        self.retries,
                        self.config.retry.max_retries
                    );
                    self.begin_connect();
                }
            }
        }
        true
    }

    /// Begin a session. Ignored while one is already being established or live.
    pub fn start(&mut self) {
        if self.pending_start.is_some() || self.state.is_active() {
            log::debug!("Session: Start ignored in state {}", self.state);
            return;
        }

        if !self.online {
            log::warn!("Session: Start refused while offline");
            self.fail_terminal(LiveError::NetworkUnavailable);
            return;
        }

        self.release_session();
        self.retries = 0;
        self.last_error = None;
        self.begin_connect();
    }

    /// End the session and release every resource. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
            log::debug!("Session: Pending reconnect cancelled");
        }

        self.release_session();
        self.retries = 0;
        self.set_awake(false);
        self.set_mood(Mood::Neutral);

        if self.state != ConnectionState::Idle {
            log::info!("Session: Stopped");
        }
        self.set_state(ConnectionState::Idle);
    }

    /// Feed a reachability change. Going offline force-stops any active session.
    pub fn set_online(&mut self, online: bool) {
        if self.online != online {
            log::info!(
                "Session: Network {}",
                if online { "online" } else { "offline" }
            );
        }
        self.online = online;

        if !online && self.state.is_active() {
            log::warn!("Session: Network lost in state {}, stopping", self.state);
            self.stop();
        }
    }

    fn begin_connect(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.session_token = CancellationToken::new();
        self.set_state(ConnectionState::Connecting);

        let input_ready = match self.input.open() {
            Ok((frames, ready)) => {
                self.frames = Some(frames);
                ready
            }
            Err(e) => {
                log::error!("Session: Microphone unavailable: {}", e);
                self.fail_terminal(e);
                return;
            }
        };

        let output_ready = match self.playback.open() {
            Ok((ended, ready)) => {
                self.spawn_chunk_forwarder(ended);
                ready
            }
            Err(e) => {
                log::error!("Session: Output device unavailable: {}", e);
                self.fail_terminal(e);
                return;
            }
        };

        self.pending_start = Some(generation);

        // Devices start on their own threads; the queue keeps running meanwhile
        let transport = Arc::clone(&self.transport);
        let setup = self.session_setup();
        let events = self.events_tx.clone();
        let token = self.session_token.clone();
        tokio::spawn(async move {
            let attempt = async {
                if let Err(error) = tokio::try_join!(
                    wait_ready(input_ready, "microphone"),
                    wait_ready(output_ready, "output device")
                ) {
                    return ControllerEvent::DeviceFailed { generation, error };
                }
                ControllerEvent::Connected {
                    generation,
                    result: transport.connect(&setup).await,
                }
            };
            tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("Session: Connect attempt {} abandoned", generation);
                }
                event = attempt => {
                    let _ = events.send(event);
                }
            }
        });
    }

    fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.config.model.clone(),
            voice: self.config.voice.clone(),
            system_instruction: self.config.system_instruction(),
            input_transcription: self.config.input_transcription,
            output_transcription: self.config.output_transcription,
        }
    }

    fn on_connected(
        &mut self,
        generation: u64,
        result: crate::error::Result<(Box<dyn LiveLink>, mpsc::Receiver<TransportEvent>)>,
    ) {
        if generation != self.generation {
            if let Ok((mut link, _)) = result {
                log::debug!("Session: Closing stale session {}", generation);
                link.close();
            }
            return;
        }
        self.pending_start = None;

        match result {
            Ok((link, events)) => {
                log::info!("Session: Socket established, awaiting setup confirmation");
                self.link = Some(link);
                self.spawn_transport_forwarder(events);
            }
            Err(e) => {
                log::warn!("Session: Connect failed: {}", e);
                self.handle_failure(e);
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                if self.state != ConnectionState::Connecting {
                    return;
                }
                self.set_state(ConnectionState::Connected);
                self.retries = 0;
                match self.frames.take() {
                    Some(mut frames) => {
                        // Speech captured during the handshake is stale by now
                        let mut stale = 0;
                        while frames.try_recv().is_ok() {
                            stale += 1;
                        }
                        if stale > 0 {
                            log::debug!("Session: Dropped {} frames captured before open", stale);
                        }
                        self.spawn_frame_forwarder(frames);
                    }
                    None => log::warn!("Session: Connected without a capture stream"),
                }
            }
            TransportEvent::Message(message) => self.on_server_event(message),
            TransportEvent::Error(e) => {
                log::warn!("Session: Transport error: {}", e);
                self.handle_failure(e);
            }
            TransportEvent::Close { code, reason } => {
                log::info!("Session: Remote closed ({:?}) {}", code, reason);
                self.handle_failure(LiveError::from_remote(code, &reason));
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        if let ServerEvent::Malformed(reason) = &event {
            log::warn!("Session: Skipping unreadable server data: {}", reason);
            return;
        }

        if let ServerEvent::Error {
            code,
            status,
            message,
        } = &event
        {
            let reason = match status {
                Some(status) => format!("{}: {}", status, message),
                None => message.clone(),
            };
            let code = code.and_then(|c| u16::try_from(c).ok());
            self.handle_failure(LiveError::from_remote(code, &reason));
            return;
        }

        if self.state != ConnectionState::Connected {
            log::debug!("Session: Ignoring {:?} in state {}", event, self.state);
            return;
        }

        match event {
            ServerEvent::Audio { mime_type, data } => self.on_audio(&mime_type, &data),
            ServerEvent::InputTranscript(text) => self.on_input_transcript(&text),
            ServerEvent::OutputTranscript(text) => self.on_output_transcript(&text),
            ServerEvent::TurnComplete => self.on_turn_complete(),
            ServerEvent::Interrupted => {
                log::info!("Session: Model interrupted");
                self.playback.interrupt();
                self.set_speaking(false);
            }
            ServerEvent::GoAway { time_left } => {
                log::warn!(
                    "Session: Server is going away (time left: {})",
                    time_left.as_deref().unwrap_or("unknown")
                );
            }
            ServerEvent::SetupComplete | ServerEvent::Error { .. } | ServerEvent::Malformed(_) => {}
        }
    }

    fn on_audio(&mut self, mime_type: &str, data: &str) {
        let rate = codec::rate_from_mime(mime_type).unwrap_or(PLAYBACK_SAMPLE_RATE);
        let buffer = match codec::decode_audio(data, rate) {
            Ok(buffer) if buffer.is_empty() => return,
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("Session: Skipping undecodable audio chunk: {}", e);
                return;
            }
        };

        match self.playback.enqueue(&buffer) {
            Ok(_) => self.set_speaking(true),
            Err(e) => log::warn!("Session: Failed to schedule audio: {}", e),
        }
    }

    fn on_input_transcript(&mut self, text: &str) {
        self.transcripts.push_input(text);
        if self.awake {
            return;
        }

        let detected = self
            .wake
            .detect(self.transcripts.input())
            .map(str::to_string);
        if let Some(phrase) = detected {
            log::info!("Session: Wake phrase \"{}\" detected", phrase);
            self.set_awake(true);
            if self.config.wake.discard_trigger_fragment {
                self.transcripts.discard_input();
            }
        }
    }

    fn on_output_transcript(&mut self, text: &str) {
        self.transcripts.push_output(text);
        if self.turn_mood.is_some() {
            return;
        }
        if let Some(mood) = detect_mood(self.transcripts.output()) {
            self.turn_mood = Some(mood);
            self.set_mood(mood);
        }
    }

    fn on_turn_complete(&mut self) {
        let emit_user = match self.config.wake.gate {
            TranscriptGate::Always => true,
            TranscriptGate::RequireAwake => self.awake,
        };

        for entry in self.transcripts.complete_turn(self.config.mode, emit_user) {
            log::info!("Session: [{}] {}", entry.speaker, entry.text);
            self.history.push(entry.clone());
            self.publish(SessionUpdate::Transcript(entry));
        }
        self.turn_mood = None;
    }

    fn on_frame(&mut self, samples: &[f32]) {
        if self.state != ConnectionState::Connected {
            return;
        }

        let frame = self.capture.process_frame(samples);
        self.volume = frame.volume;
        self.publish(SessionUpdate::Volume(frame.volume));

        // Best effort: a dropped frame is preferable to stalling capture
        if let Some(link) = &self.link {
            if let Err(e) = link.send_audio(frame.blob) {
                log::trace!("Session: Dropped outbound frame: {}", e);
            }
        }
    }

    fn on_chunk_ended(&mut self, id: ChunkId) {
        if self.playback.on_chunk_ended(id) {
            self.set_speaking(false);
        }
    }

    fn handle_failure(&mut self, error: LiveError) {
        self.release_session();

        let max_retries = self.config.retry.max_retries;
        if error.is_recoverable() && self.retries < max_retries {
            self.retries += 1;
            let delay = self.config.retry.delay_for(self.retries);
            log::warn!(
                "Session: {} - reconnecting in {:?} (attempt {}/{})",
                error,
                delay,
                self.retries,
                max_retries
            );
            self.set_state(ConnectionState::Reconnecting);

            let events = self.events_tx.clone();
            let generation = self.generation;
            self.retry_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(ControllerEvent::RetryDue { generation });
            }));
        } else {
            if error.is_recoverable() {
                log::error!("Session: Giving up after {} retries", max_retries);
            }
            self.fail_terminal(error);
        }
    }

    /// Tear down and surface `error`. Resources are released before the message goes out.
    fn fail_terminal(&mut self, error: LiveError) {
        self.release_session();
        self.retries = 0;
        log::error!("Session: {}", error);

        self.set_state(ConnectionState::Error);
        self.publish(SessionUpdate::Error {
            kind: error.kind(),
            message: error.user_message(),
        });
        self.last_error = Some(error);
    }

    /// Close the link and both devices, drop queued audio, and fence off
    /// every task of the current session.
    fn release_session(&mut self) {
        self.session_token.cancel();
        self.pending_start = None;
        self.generation += 1;

        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.frames = None;

        self.playback.close();
        if self.input.is_open() {
            self.input.close();
        }

        self.transcripts.reset();
        self.turn_mood = None;
        self.set_speaking(false);
        if self.volume != 0.0 {
            self.volume = 0.0;
            self.publish(SessionUpdate::Volume(0.0));
        }
    }

    fn spawn_frame_forwarder(&self, mut frames: mpsc::Receiver<Vec<f32>>) {
        let events = self.events_tx.clone();
        let token = self.session_token.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(samples) => {
                            if events.send(ControllerEvent::Frame { generation, samples }).is_err() {
                                break;
                            }
                        }
                        None => {
                            log::debug!("Session: Capture stream ended");
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_transport_forwarder(&self, mut remote: mpsc::Receiver<TransportEvent>) {
        let events = self.events_tx.clone();
        let token = self.session_token.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    event = remote.recv() => match event {
                        Some(event) => {
                            if events.send(ControllerEvent::Transport { generation, event }).is_err() {
                                return;
                            }
                        }
                        None => break,
                    }
                }
            }
            // Event stream ended without a close frame
            let _ = events.send(ControllerEvent::Transport {
                generation,
                event: TransportEvent::Close {
                    code: None,
                    reason: String::new(),
                },
            });
        });
    }

    fn spawn_chunk_forwarder(&self, mut ended: mpsc::UnboundedReceiver<ChunkId>) {
        let events = self.events_tx.clone();
        let token = self.session_token.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    id = ended.recv() => match id {
                        Some(id) => {
                            if events.send(ControllerEvent::ChunkEnded { generation, id }).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            log::error!("Session: Refusing transition {} → {}", self.state, next);
            return;
        }
        log::info!("Session: {} → {}", self.state, next);
        self.state = next;
        self.publish(SessionUpdate::State(next));
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.speaking != speaking {
            self.speaking = speaking;
            self.publish(SessionUpdate::Speaking(speaking));
        }
    }

    fn set_awake(&mut self, awake: bool) {
        if self.awake != awake {
            self.awake = awake;
            self.publish(SessionUpdate::Awake(awake));
        }
    }

    fn set_mood(&mut self, mood: Mood) {
        if self.mood != mood {
            self.mood = mood;
            self.publish(SessionUpdate::Mood(mood));
        }
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn is_awake(&self) -> bool {
        self.awake
    }

    pub fn mood(&self) -> Mood {
        self.mood
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn last_error(&self) -> Option<&LiveError> {
        self.last_error.as_ref()
    }

    pub fn history(&self) -> &TranscriptHistory {
        &self.history
    }

    pub fn live_chunks(&self) -> usize {
        self.playback.live_chunks()
    }

    pub fn next_start_time(&self) -> f64 {
        self.playback.next_start_time()
    }

    pub fn has_live_session(&self) -> bool {
        self.link.is_some()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.session_token.cancel();
    }
}

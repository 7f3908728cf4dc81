//! Connection states, UI-facing updates, and the controller's internal event queue

use crate::error::{ErrorKind, LiveError, Result};
use crate::playback::ChunkId;
use crate::signals::Mood;
use crate::transcript::TranscriptionEntry;
use crate::transport::{LiveLink, TransportEvent};
use strum::Display;
use tokio::sync::mpsc;

/// Lifecycle of the remote session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    /// Whether `next` is a defined edge from this state. Every state may return to `Idle`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Connecting)
                | (Idle, Error)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Error)
                | (Connected, Reconnecting)
                | (Connected, Error)
                | (Reconnecting, Connecting)
                | (Error, Connecting)
        )
    }

    /// True while a session is being established, is live, or is waiting to retry
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

/// Everything the UI collaborators are told about the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    State(ConnectionState),
    /// Microphone loudness, 0..=1
    Volume(f32),
    Speaking(bool),
    Awake(bool),
    Mood(Mood),
    Transcript(TranscriptionEntry),
    Error { kind: ErrorKind, message: String },
}

/// User and environment requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    SetOnline(bool),
    Shutdown,
}

/// Items on the controller's single queue.
///
/// Task-originated events carry the generation of the session that produced
/// them; the controller drops any whose generation is no longer current.
pub(crate) enum ControllerEvent {
    Command(Command),
    /// An audio device failed to start after `open` returned
    DeviceFailed {
        generation: u64,
        error: LiveError,
    },
    Connected {
        generation: u64,
        result: Result<(Box<dyn LiveLink>, mpsc::Receiver<TransportEvent>)>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Frame {
        generation: u64,
        samples: Vec<f32>,
    },
    ChunkEnded {
        generation: u64,
        id: ChunkId,
    },
    RetryDue {
        generation: u64,
    },
}

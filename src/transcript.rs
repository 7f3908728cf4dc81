//! Per-turn transcript accumulation and the completed-utterance history.

use crate::config::Mode;
use crate::signals::strip_mood_tags;
use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Model,
}

/// A completed utterance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionEntry {
    pub id: Uuid,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_mode")]
    pub mode: Mode,
}

fn serialize_mode<S: serde::Serializer>(mode: &Mode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&mode.to_string())
}

impl TranscriptionEntry {
    fn new(speaker: Speaker, text: String, mode: Mode) -> Self {
        Self {
            id: Uuid::new_v4(),
            speaker,
            text,
            timestamp: Utc::now(),
            mode,
        }
    }
}

/// Input and output text accumulated during the current turn
#[derive(Debug, Default, Clone)]
pub struct TranscriptBuffer {
    pub input: String,
    pub output: String,
}

impl TranscriptBuffer {
    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }
}

#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    buffer: TranscriptBuffer,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, fragment: &str) {
        self.buffer.input.push_str(fragment);
    }

    pub fn push_output(&mut self, fragment: &str) {
        self.buffer.output.push_str(fragment);
    }

    pub fn input(&self) -> &str {
        &self.buffer.input
    }

    pub fn output(&self) -> &str {
        &self.buffer.output
    }

    /// Forget the input so far, used when a wake phrase triggered
    pub fn discard_input(&mut self) {
        self.buffer.input.clear();
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Close the turn and emit its entries, user before model.
    ///
    /// `emit_user` is false when the transcript gate withholds the user
    /// utterance. Mood tags are stripped from the model text. The buffer is
    /// cleared in every case.
    pub fn complete_turn(&mut self, mode: Mode, emit_user: bool) -> Vec<TranscriptionEntry> {
        let mut entries = Vec::with_capacity(2);

        let input = self.buffer.input.trim();
        if emit_user && !input.is_empty() {
            entries.push(TranscriptionEntry::new(
                Speaker::User,
                input.to_string(),
                mode,
            ));
        }

        let output = strip_mood_tags(&self.buffer.output);
        if !output.is_empty() {
            entries.push(TranscriptionEntry::new(Speaker::Model, output, mode));
        }

        self.buffer.clear();
        entries
    }
}

/// Append-only record of completed utterances for the process lifetime
#[derive(Debug, Default)]
pub struct TranscriptHistory {
    entries: Vec<TranscriptionEntry>,
}

impl TranscriptHistory {
    pub fn push(&mut self, entry: TranscriptionEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptionEntry] {
        &self.entries
    }

    pub fn for_mode(&self, mode: Mode) -> impl Iterator<Item = &TranscriptionEntry> {
        self.entries.iter().filter(move |e| e.mode == mode)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

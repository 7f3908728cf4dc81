//! Wake-phrase and mood-tag extraction from transcript text.
//!
//! Both extractors are pure: they inspect text and report what they found.
//! The session controller decides what to do with the result.

use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

static MOOD_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([A-Za-z]+)\]").unwrap());
// A tag with the spaces or tabs on either side of it
static PADDED_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([ \t]*)\[([A-Za-z]+)\]([ \t]*)").unwrap());

/// Avatar affect driven by mood tags in the model transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mood {
    Neutral,
    Happy,
    Excited,
    Thinking,
    Surprised,
    Sad,
    Angry,
}

/// Case-insensitive wake-phrase matcher
#[derive(Debug, Clone)]
pub struct WakeDetector {
    phrases: Vec<String>,
}

impl WakeDetector {
    pub fn new(phrases: &[String]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Returns the first configured phrase found in `transcript`
    pub fn detect(&self, transcript: &str) -> Option<&str> {
        let folded = transcript.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| folded.contains(phrase.as_str()))
            .map(String::as_str)
    }
}

/// Returns the first known mood tag in `text`. Unknown bracketed words are skipped.
pub fn detect_mood(text: &str) -> Option<Mood> {
    MOOD_TAG
        .captures_iter(text)
        .find_map(|caps| Mood::from_str(&caps[1]).ok())
}

/// Removes known mood tags along with the spaces and tabs around them. A
/// spaced tag between two words leaves one space; other whitespace is kept.
pub fn strip_mood_tags(text: &str) -> String {
    let stripped = PADDED_TAG.replace_all(text, |caps: &regex::Captures| {
        if Mood::from_str(&caps[2]).is_err() {
            return caps[0].to_string();
        }
        let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        let padded = !caps[1].is_empty() || !caps[3].is_empty();
        let word_before = text[..start]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_whitespace());
        let word_after = text[end..].chars().next().is_some_and(|c| !c.is_whitespace());
        if padded && word_before && word_after {
            " ".to_string()
        } else {
            String::new()
        }
    });
    stripped.trim().to_string()
}

// System instructions sent in the session setup frame

use crate::config::Mode;
use crate::signals::Mood;
use strum::IntoEnumIterator;

const INTERPRETER_PROMPT: &str = "You are a real-time voice interpreter.

INTERPRETATION RULES:
1. When you hear {source}, say the same thing in {target}.
2. When you hear {target}, say the same thing in {source}.
3. Speak only the translation. Never answer questions, add commentary or greet the speaker.
4. Keep names, numbers and technical terms exact.
5. If the audio is unclear, stay silent rather than guessing.";

const COMPANION_PROMPT: &str = "You are a warm, curious voice companion having a spoken conversation.

VOICE RESPONSE GUIDELINES:
- Keep responses conversational and natural for speech
- Avoid markdown, bullet points, or complex formatting
- Respond in a few sentences unless more detail is asked for
- Start every reply with exactly one mood tag from this list: {moods}
- The mood tag is not spoken aloud, it only describes how you feel about the reply
- When the user greets you by name (\"hey gemini\"), answer with a short greeting";

const POLITE_RULES: &str = "

REGISTER:
Always use the most polite, honorific register of the output language (for example \
Korean jondaenmal or Japanese keigo). Never switch to casual speech, even if the speaker does.";

/// Build the system instruction for a session
pub fn system_instruction(mode: Mode, polite: bool, source: &str, target: &str) -> String {
    let mut prompt = match mode {
        Mode::Translate => INTERPRETER_PROMPT
            .replace("{source}", source)
            .replace("{target}", target),
        Mode::Chat => COMPANION_PROMPT.replace("{moods}", &mood_vocabulary()),
    };

    if polite {
        prompt.push_str(POLITE_RULES);
    }
    prompt
}

fn mood_vocabulary() -> String {
    Mood::iter()
        .map(|m| format!("[{}]", m))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_prompt_names_languages() {
        let prompt = system_instruction(Mode::Translate, false, "English", "Korean");
        assert!(prompt.contains("When you hear English, say the same thing in Korean."));
        assert!(!prompt.contains("{source}"));
        assert!(!prompt.contains("REGISTER"));
    }

    #[test]
    fn test_chat_prompt_lists_mood_tags() {
        let prompt = system_instruction(Mode::Chat, false, "English", "Korean");
        assert!(prompt.contains("[happy]"));
        assert!(prompt.contains("[thinking]"));
    }

    #[test]
    fn test_polite_flag_adds_register_rules() {
        let prompt = system_instruction(Mode::Chat, true, "English", "Korean");
        assert!(prompt.contains("honorific"));
    }
}

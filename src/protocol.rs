//! Wire messages for the Gemini Live bidirectional streaming protocol.
//!
//! The client sends one `setup` frame, then a stream of `realtimeInput`
//! frames carrying base64 PCM. The server answers with `setupComplete`
//! followed by `serverContent` frames that carry audio parts, transcripts,
//! and turn/interruption flags.

use crate::codec::EncodedBlob;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const GEMINI_LIVE_WS_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Parameters of the setup frame
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

#[derive(Debug, Serialize)]
struct SetupMessage<'a> {
    setup: SetupPayload<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupPayload<'a> {
    model: String,
    generation_config: GenerationConfig<'a>,
    system_instruction: Content<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Empty>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [MediaChunk<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk<'a> {
    mime_type: &'a str,
    data: &'a str,
}

/// Serialize the setup frame sent right after the socket opens
pub fn build_setup_message(setup: &SessionSetup) -> Result<String, serde_json::Error> {
    let model = if setup.model.starts_with("models/") {
        setup.model.clone()
    } else {
        format!("models/{}", setup.model)
    };

    serde_json::to_string(&SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &setup.voice,
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: [TextPart {
                    text: &setup.system_instruction,
                }],
            },
            input_audio_transcription: setup.input_transcription.then_some(Empty {}),
            output_audio_transcription: setup.output_transcription.then_some(Empty {}),
        },
    })
}

/// Serialize one captured audio frame
pub fn build_audio_message(blob: &EncodedBlob) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [MediaChunk {
                mime_type: &blob.mime_type,
                data: &blob.data,
            }],
        },
    })
}

/// Inbound event kinds, in the order they are dispatched within one frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    Audio { mime_type: String, data: String },
    InputTranscript(String),
    OutputTranscript(String),
    TurnComplete,
    Interrupted,
    GoAway { time_left: Option<String> },
    Error {
        code: Option<i64>,
        status: Option<String>,
        message: String,
    },
    /// A frame or section that could not be read. The rest of the frame is still dispatched.
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    code: Option<i64>,
    status: Option<String>,
    #[serde(default)]
    message: String,
}

/// Read `key` from `parent` as `T`. A present but unreadable value is
/// reported as `Malformed` and treated as absent.
fn section<T: DeserializeOwned>(
    parent: &Map<String, Value>,
    key: &str,
    events: &mut Vec<ServerEvent>,
) -> Option<T> {
    let value = parent.get(key)?;
    match T::deserialize(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            events.push(ServerEvent::Malformed(format!("{}: {}", key, e)));
            None
        }
    }
}

fn parse_server_content(content: &Value, events: &mut Vec<ServerEvent>) {
    let Some(content) = content.as_object() else {
        events.push(ServerEvent::Malformed("serverContent is not an object".to_string()));
        return;
    };

    if let Some(turn) = section::<ModelTurn>(content, "modelTurn", events) {
        for part in &turn.parts {
            match Part::deserialize(part) {
                Ok(Part {
                    inline_data: Some(inline),
                }) if !inline.data.is_empty() => events.push(ServerEvent::Audio {
                    mime_type: inline.mime_type,
                    data: inline.data,
                }),
                Ok(Part {
                    inline_data: Some(_),
                }) => events.push(ServerEvent::Malformed("inlineData without data".to_string())),
                // Text and other part kinds carry nothing to play
                Ok(_) => {}
                Err(e) => events.push(ServerEvent::Malformed(format!("part: {}", e))),
            }
        }
    }

    if let Some(t) = section::<Transcription>(content, "inputTranscription", events) {
        if !t.text.is_empty() {
            events.push(ServerEvent::InputTranscript(t.text));
        }
    }
    if let Some(t) = section::<Transcription>(content, "outputTranscription", events) {
        if !t.text.is_empty() {
            events.push(ServerEvent::OutputTranscript(t.text));
        }
    }
    if section::<bool>(content, "turnComplete", events).unwrap_or(false) {
        events.push(ServerEvent::TurnComplete);
    }
    if section::<bool>(content, "interrupted", events).unwrap_or(false) {
        events.push(ServerEvent::Interrupted);
    }
}

/// Parse one server frame into zero or more events.
///
/// Sections are read independently, so a bad field costs only that field.
pub fn parse_server_message(json_text: &str) -> Vec<ServerEvent> {
    let frame: Value = match serde_json::from_str(json_text) {
        Ok(frame) => frame,
        Err(e) => return vec![ServerEvent::Malformed(format!("invalid JSON: {}", e))],
    };
    let Some(frame) = frame.as_object() else {
        return vec![ServerEvent::Malformed("frame is not an object".to_string())];
    };

    let mut events = Vec::new();

    if frame.contains_key("setupComplete") {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = frame.get("serverContent") {
        parse_server_content(content, &mut events);
    }

    if let Some(go_away) = section::<GoAway>(frame, "goAway", &mut events) {
        events.push(ServerEvent::GoAway {
            time_left: go_away.time_left,
        });
    }

    if let Some(error) = section::<ServerError>(frame, "error", &mut events) {
        events.push(ServerEvent::Error {
            code: error.code,
            status: error.status,
            message: error.message,
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionSetup {
        SessionSetup {
            model: "gemini-live-test".to_string(),
            voice: "Puck".to_string(),
            system_instruction: "Translate.".to_string(),
            input_transcription: true,
            output_transcription: false,
        }
    }

    #[test]
    fn test_setup_message_shape() {
        let json: Value = serde_json::from_str(&build_setup_message(&setup()).unwrap()).unwrap();
        let payload = &json["setup"];
        assert_eq!(payload["model"], "models/gemini-live-test");
        assert_eq!(payload["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            payload["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "Translate.");
        assert!(payload["inputAudioTranscription"].is_object());
        assert!(payload.get("outputAudioTranscription").is_none());
    }

    #[test]
    fn test_audio_message_shape() {
        let blob = EncodedBlob {
            data: "AAAA".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        let json: Value = serde_json::from_str(&build_audio_message(&blob).unwrap()).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAAA");
    }

    #[test]
    fn test_parse_setup_complete() {
        assert_eq!(
            parse_server_message(r#"{"setupComplete":{}}"#),
            vec![ServerEvent::SetupComplete]
        );
    }

    #[test]
    fn test_parse_server_content_order() {
        let frame = r#"{
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}}]},
                "inputTranscription": {"text": "hola"},
                "outputTranscription": {"text": "[happy] hello"},
                "turnComplete": true
            }
        }"#;
        assert_eq!(
            parse_server_message(frame),
            vec![
                ServerEvent::Audio {
                    mime_type: "audio/pcm;rate=24000".to_string(),
                    data: "AAA=".to_string()
                },
                ServerEvent::InputTranscript("hola".to_string()),
                ServerEvent::OutputTranscript("[happy] hello".to_string()),
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_parse_interrupted_and_go_away() {
        assert_eq!(
            parse_server_message(r#"{"serverContent":{"interrupted":true}}"#),
            vec![ServerEvent::Interrupted]
        );
        assert_eq!(
            parse_server_message(r#"{"goAway":{"timeLeft":"10s"}}"#),
            vec![ServerEvent::GoAway {
                time_left: Some("10s".to_string())
            }]
        );
    }

    #[test]
    fn test_parse_garbage_is_malformed_not_error() {
        let events = parse_server_message("{not json");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::Malformed(_)));

        assert!(matches!(
            parse_server_message("[1, 2]").as_slice(),
            [ServerEvent::Malformed(_)]
        ));
    }

    #[test]
    fn test_bad_part_keeps_rest_of_frame() {
        let frame = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000"}}]},"outputTranscription":{"text":"hi"}}}"#;
        let events = parse_server_message(frame);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ServerEvent::Malformed(_)));
        assert_eq!(events[1], ServerEvent::OutputTranscript("hi".to_string()));
    }

    #[test]
    fn test_mistyped_fields_are_skipped_individually() {
        let frame = r#"{
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": 7}, {"text": "thinking"}, {"inlineData": {"data": "AAA="}}]},
                "inputTranscription": {"text": 42},
                "turnComplete": "yes",
                "interrupted": true
            }
        }"#;
        let events = parse_server_message(frame);
        let malformed = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::Malformed(_)))
            .count();
        assert_eq!(malformed, 3);
        assert!(events.contains(&ServerEvent::Audio {
            mime_type: String::new(),
            data: "AAA=".to_string()
        }));
        assert!(events.contains(&ServerEvent::Interrupted));
        assert!(!events.contains(&ServerEvent::TurnComplete));
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::Error { .. })));
    }

    #[test]
    fn test_parse_server_error() {
        assert_eq!(
            parse_server_message(r#"{"error":{"code":503,"status":"UNAVAILABLE","message":"busy"}}"#),
            vec![ServerEvent::Error {
                code: Some(503),
                status: Some("UNAVAILABLE".to_string()),
                message: "busy".to_string()
            }]
        );
    }

    #[test]
    fn test_empty_transcripts_are_dropped() {
        assert!(parse_server_message(r#"{"serverContent":{"inputTranscription":{"text":""}}}"#)
            .is_empty());
    }
}

//! GeminiLiveTransport against a loopback WebSocket server speaking the live protocol

use futures_util::{SinkExt, StreamExt};
use live_voice::codec::encode_frame;
use live_voice::protocol::{ServerEvent, SessionSetup};
use live_voice::transport::{GeminiLiveTransport, LiveTransport, TransportEvent};
use secrecy::SecretBox;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

fn setup() -> SessionSetup {
    SessionSetup {
        model: "test-model".to_string(),
        voice: "Kore".to_string(),
        system_instruction: "Translate.".to_string(),
        input_transcription: true,
        output_transcription: true,
    }
}

async fn next_text<S>(ws: &mut S) -> String
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await.expect("stream ended").expect("read failed") {
            Message::Text(text) => return text.as_str().to_owned(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_session_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let setup = next_text(&mut ws).await;
        ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
            .await
            .unwrap();

        let audio = next_text(&mut ws).await;

        // JSON also arrives in binary frames
        let content = br#"{"serverContent":{"outputTranscription":{"text":"annyeong"},"turnComplete":true}}"#;
        ws.send(Message::Binary(content.to_vec().into()))
            .await
            .unwrap();
        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "busy".into(),
        })))
        .await
        .unwrap();

        (setup, audio)
    });

    let transport = GeminiLiveTransport::with_endpoint(
        SecretBox::new(Box::new("AIzaLoopbackKey".to_string())),
        &format!("ws://127.0.0.1:{}/live", port),
        Duration::from_secs(5),
    );

    let (mut link, mut events) = transport.connect(&setup()).await.unwrap();
    assert_eq!(events.recv().await, Some(TransportEvent::Open));

    link.send_audio(encode_frame(&[0.25; 160])).unwrap();

    assert_eq!(
        events.recv().await,
        Some(TransportEvent::Message(ServerEvent::OutputTranscript(
            "annyeong".to_string()
        )))
    );
    assert_eq!(
        events.recv().await,
        Some(TransportEvent::Message(ServerEvent::TurnComplete))
    );
    assert_eq!(
        events.recv().await,
        Some(TransportEvent::Close {
            code: Some(1011),
            reason: "busy".to_string()
        })
    );

    let (setup_text, audio_text) = server.await.unwrap();
    let setup_json: Value = serde_json::from_str(&setup_text).unwrap();
    assert_eq!(setup_json["setup"]["model"], "models/test-model");
    assert!(setup_json["setup"]["outputAudioTranscription"].is_object());

    let audio_json: Value = serde_json::from_str(&audio_text).unwrap();
    let chunk = &audio_json["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    assert!(!chunk["data"].as_str().unwrap().is_empty());

    link.close();
    link.close();
    assert!(link.send_audio(encode_frame(&[0.0; 16])).is_err());
}

use crate::codec::EncodedBlob;
use crate::error::{LiveError, Result};
use crate::protocol::{self, ServerEvent, SessionSetup, GEMINI_LIVE_WS_URL};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretBox};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

/// Callback surface of a remote session, delivered in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(ServerEvent),
    Error(LiveError),
    Close { code: Option<u16>, reason: String },
}

/// Outbound half of a live session
pub trait LiveLink: Send {
    /// Queue a frame without waiting. A full or closed queue is reported, never awaited.
    fn send_audio(&self, blob: EncodedBlob) -> Result<()>;

    /// Close the session. Calling it again has no effect.
    fn close(&mut self);
}

#[async_trait::async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(
        &self,
        setup: &SessionSetup,
    ) -> Result<(Box<dyn LiveLink>, mpsc::Receiver<TransportEvent>)>;
}

enum Outbound {
    Audio(EncodedBlob),
    Close,
}

/// WebSocket transport for the Gemini Live API
pub struct GeminiLiveTransport {
    api_key: SecretBox<String>,
    endpoint: String,
    connect_timeout: Duration,
}

impl GeminiLiveTransport {
    pub fn new(api_key: SecretBox<String>, connect_timeout: Duration) -> Self {
        Self::with_endpoint(api_key, GEMINI_LIVE_WS_URL, connect_timeout)
    }

    pub fn with_endpoint(
        api_key: SecretBox<String>,
        endpoint: &str,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            api_key,
            endpoint: endpoint.to_string(),
            connect_timeout,
        }
    }

    fn session_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }

    async fn writer_loop(
        mut write: SplitSink<WsStream, Message>,
        mut outbound: mpsc::Receiver<Outbound>,
    ) {
        let mut frame_count: u64 = 0;

        while let Some(msg) = outbound.recv().await {
            match msg {
                Outbound::Audio(blob) => {
                    let json = match protocol::build_audio_message(&blob) {
                        Ok(json) => json,
                        Err(e) => {
                            log::error!("Transport: Failed to serialize audio frame: {}", e);
                            continue;
                        }
                    };
                    frame_count += 1;
                    if frame_count == 1 || frame_count % 50 == 0 {
                        log::debug!("Transport: Sent {} audio frames", frame_count);
                    }
                    if write.send(Message::Text(json.into())).await.is_err() {
                        log::warn!("Transport: Send failed, closing writer");
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        let _ = write.close().await;
        log::debug!("Transport: Writer loop terminated after {} frames", frame_count);
    }

    async fn reader_loop(mut read: SplitStream<WsStream>, events: mpsc::Sender<TransportEvent>) {
        let mut opened = false;

        while let Some(msg_result) = read.next().await {
            let text = match msg_result {
                Ok(Message::Text(text)) => text.to_string(),
                // The service also delivers JSON in binary frames
                Ok(Message::Binary(data)) if data.as_slice().first() == Some(&b'{') => {
                    match std::str::from_utf8(data.as_slice()) {
                        Ok(text) => text.to_string(),
                        Err(_) => continue,
                    }
                }
                Ok(Message::Binary(data)) => {
                    log::trace!("Transport: Ignoring {} byte binary frame", data.len());
                    continue;
                }
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), (*frame.reason).to_string()),
                        None => (None, String::new()),
                    };
                    log::info!("Transport: Server closed connection: {:?} {}", code, reason);
                    let _ = events.send(TransportEvent::Close { code, reason }).await;
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("Transport: WebSocket error: {}", e);
                    let _ = events.send(TransportEvent::Error(LiveError::from(e))).await;
                    return;
                }
            };

            for event in protocol::parse_server_message(&text) {
                let event = match event {
                    ServerEvent::SetupComplete if !opened => {
                        opened = true;
                        TransportEvent::Open
                    }
                    ServerEvent::SetupComplete => continue,
                    other => TransportEvent::Message(other),
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }

        let _ = events
            .send(TransportEvent::Close {
                code: None,
                reason: String::new(),
            })
            .await;
    }
}

#[async_trait::async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn connect(
        &self,
        setup: &SessionSetup,
    ) -> Result<(Box<dyn LiveLink>, mpsc::Receiver<TransportEvent>)> {
        let url = self.session_url()?;
        log::info!(
            "Transport: Connecting to {} (model: {}, voice: {})",
            self.endpoint,
            setup.model,
            setup.voice
        );

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                LiveError::TransientService(format!(
                    "connection timed out after {:?}",
                    self.connect_timeout
                ))
            })??;

        let (mut write, read) = ws_stream.split();
        let setup_json = protocol::build_setup_message(setup)?;
        write.send(Message::Text(setup_json.into())).await?;
        log::debug!("Transport: Setup frame sent");

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);

        let writer = tokio::spawn(Self::writer_loop(write, outbound_rx));
        let reader = tokio::spawn(Self::reader_loop(read, event_tx));

        let link = GeminiLiveLink {
            outbound: outbound_tx,
            reader,
            writer,
            closed: false,
        };
        Ok((Box::new(link), event_rx))
    }
}

pub struct GeminiLiveLink {
    outbound: mpsc::Sender<Outbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    closed: bool,
}

impl LiveLink for GeminiLiveLink {
    fn send_audio(&self, blob: EncodedBlob) -> Result<()> {
        if self.closed {
            return Err(LiveError::Send("link is closed".to_string()));
        }
        self.outbound
            .try_send(Outbound::Audio(blob))
            .map_err(|e| LiveError::Send(e.to_string()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reader.abort();
        if self.outbound.try_send(Outbound::Close).is_err() {
            // Writer is gone or backed up; drop the socket instead of waiting
            self.writer.abort();
        }
        log::debug!("Transport: Link closed");
    }
}

impl Drop for GeminiLiveLink {
    fn drop(&mut self) {
        self.close();
    }
}

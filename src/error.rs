use strum::Display;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LiveError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiveError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Service temporarily unavailable: {0}")]
    TransientService(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Malformed audio payload: {0}")]
    ProtocolDecode(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Send failed: {0}")]
    Send(String),
}

/// Coarse error category surfaced to the UI alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    #[strum(serialize = "permission-denied")]
    PermissionDenied,
    #[strum(serialize = "device-not-found")]
    DeviceNotFound,
    #[strum(serialize = "network")]
    Network,
    #[strum(serialize = "service")]
    Service,
    #[strum(serialize = "auth")]
    Auth,
    #[strum(serialize = "decode")]
    Decode,
    #[strum(serialize = "generic")]
    Generic,
}

// Lowercased fragments that mark a remote failure as terminal.
const TERMINAL_MARKERS: &[&str] = &[
    "api key",
    "api_key",
    "unauthenticated",
    "unauthorized",
    "permission denied",
    "permission_denied",
    "not found",
    "not_found",
    "invalid credential",
];

impl LiveError {
    /// Only transient service failures are retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LiveError::TransientService(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LiveError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            LiveError::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            LiveError::NetworkUnavailable => ErrorKind::Network,
            LiveError::TransientService(_) => ErrorKind::Service,
            LiveError::Auth(_) => ErrorKind::Auth,
            LiveError::ProtocolDecode(_) => ErrorKind::Decode,
            LiveError::Audio(_)
            | LiveError::Protocol(_)
            | LiveError::Config(_)
            | LiveError::Send(_) => ErrorKind::Generic,
        }
    }

    /// Text shown to the user when the session lands in the error state.
    pub fn user_message(&self) -> String {
        match self {
            LiveError::PermissionDenied(_) => {
                "Microphone access was denied. Allow microphone access and start again.".to_string()
            }
            LiveError::DeviceNotFound(_) => {
                "No microphone or speaker was found. Connect an audio device and start again."
                    .to_string()
            }
            LiveError::NetworkUnavailable => {
                "You appear to be offline. Check your connection and start again.".to_string()
            }
            LiveError::TransientService(_) => {
                "The voice service is busy right now. Please try again in a moment.".to_string()
            }
            LiveError::Auth(reason) => format!(
                "The voice service rejected the credentials ({}). Check GEMINI_API_KEY.",
                reason
            ),
            other => format!("Something went wrong: {}", other),
        }
    }

    /// Classify a close frame or server error reported by the remote session.
    ///
    /// Credential and missing-entity failures are terminal; everything else,
    /// including unknown reasons, is treated as transient.
    pub fn from_remote(code: Option<u16>, reason: &str) -> Self {
        let lowered = reason.to_lowercase();
        if TERMINAL_MARKERS.iter().any(|m| lowered.contains(m)) {
            return LiveError::Auth(reason.to_string());
        }

        let detail = match code {
            Some(code) if reason.is_empty() => format!("connection closed with code {}", code),
            Some(code) => format!("{} (code {})", reason, code),
            None if reason.is_empty() => "connection closed".to_string(),
            None => reason.to_string(),
        };
        LiveError::TransientService(detail)
    }

    /// Classify an HTTP status returned during the WebSocket handshake.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 | 404 => LiveError::Auth(format!("HTTP {}: {}", status, body)),
            400 => LiveError::from_remote(None, body),
            _ => LiveError::TransientService(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(response) => {
                let body = response
                    .body()
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                LiveError::from_http_status(response.status().as_u16(), &body)
            }
            WsError::Url(e) => LiveError::Config(e.to_string()),
            other => LiveError::TransientService(other.to_string()),
        }
    }
}

impl From<url::ParseError> for LiveError {
    fn from(err: url::ParseError) -> Self {
        LiveError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(err: serde_json::Error) -> Self {
        LiveError::Protocol(err.to_string())
    }
}

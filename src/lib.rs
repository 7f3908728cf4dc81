pub mod audio_capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod playback;
pub mod prompts;
pub mod protocol;
pub mod reachability;
pub mod session;
pub mod signals;
pub mod transcript;
pub mod transport;

pub use error::{LiveError, Result};
pub use session::{ConnectionState, ControllerHandle, SessionController, SessionUpdate};

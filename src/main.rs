use anyhow::{Context, Result};
use clap::Parser;
use live_voice::audio_capture::{AudioCaptureConfig, CpalMicrophone};
use live_voice::config::{load_config, Backoff, Mode, SessionConfig, TranscriptGate};
use live_voice::playback::{CpalOutput, CpalOutputConfig};
use live_voice::reachability::NetworkMonitor;
use live_voice::transport::GeminiLiveTransport;
use live_voice::{SessionController, SessionUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Conversation mode
    #[arg(long, value_enum, default_value_t = Mode::Translate)]
    mode: Mode,

    /// Use the honorific register
    #[arg(long)]
    polite: bool,

    /// Prebuilt voice for model speech
    #[arg(long, default_value = live_voice::config::DEFAULT_VOICE)]
    voice: String,

    /// Live model identifier
    #[arg(long, default_value = live_voice::config::DEFAULT_MODEL)]
    model: String,

    /// Language spoken by the user (translate mode)
    #[arg(long, default_value = "English")]
    source_lang: String,

    /// Language to translate into (translate mode)
    #[arg(long, default_value = "Korean")]
    target_lang: String,

    /// Reconnect attempts after a transient failure
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    #[arg(long, value_enum, default_value_t = Backoff::Exponential)]
    backoff: Backoff,

    /// Base reconnect delay in milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Wake phrase (repeatable, replaces the defaults)
    #[arg(long = "wake-phrase")]
    wake_phrases: Vec<String>,

    /// Only record user utterances after a wake phrase
    #[arg(long)]
    require_wake: bool,

    /// Capture device name (default device if omitted)
    #[arg(long)]
    input_device: Option<String>,

    /// Playback device name (default device if omitted)
    #[arg(long)]
    output_device: Option<String>,

    /// Skip the reachability probe and assume the network is up
    #[arg(long)]
    no_network_probe: bool,

    /// Print transcript entries as JSON lines
    #[arg(long)]
    json: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig {
            mode: self.mode,
            polite: self.polite,
            model: self.model.clone(),
            voice: self.voice.clone(),
            source_language: self.source_lang.clone(),
            target_language: self.target_lang.clone(),
            ..SessionConfig::default()
        };
        config.retry.max_retries = self.max_retries;
        config.retry.strategy = self.backoff;
        config.retry.base_delay = Duration::from_millis(self.retry_delay_ms);
        if !self.wake_phrases.is_empty() {
            config.wake.phrases = self.wake_phrases.clone();
        }
        if self.require_wake {
            config.wake.gate = TranscriptGate::RequireAwake;
        }
        config
    }
}

async fn print_updates(mut updates: broadcast::Receiver<SessionUpdate>, json: bool) {
    loop {
        let update = match updates.recv().await {
            Ok(update) => update,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("UI: Skipped {} updates", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match update {
            SessionUpdate::State(state) => println!("● {}", state),
            SessionUpdate::Speaking(true) => println!("🔊 speaking"),
            SessionUpdate::Awake(true) => println!("👂 awake"),
            SessionUpdate::Mood(mood) => println!("🙂 mood: {}", mood),
            SessionUpdate::Transcript(entry) => {
                if json {
                    match serde_json::to_string(&entry) {
                        Ok(line) => println!("{}", line),
                        Err(e) => log::warn!("UI: Failed to serialize entry: {}", e),
                    }
                } else {
                    println!("[{}] {}", entry.speaker, entry.text);
                }
            }
            SessionUpdate::Error { kind, message } => println!("❌ {} ({})", message, kind),
            SessionUpdate::Volume(_) | SessionUpdate::Speaking(false) | SessionUpdate::Awake(false) => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    log::info!("🚀 Initializing live-voice ({} mode)", args.mode);

    let api_config = load_config().context("Failed to load configuration")?;
    let session_config = args.session_config();

    let transport = Arc::new(GeminiLiveTransport::new(
        api_config.gemini_key,
        session_config.connect_timeout,
    ));
    let microphone = CpalMicrophone::new(AudioCaptureConfig {
        device_name: args.input_device.clone(),
    });
    let speaker = CpalOutput::new(CpalOutputConfig {
        device_name: args.output_device.clone(),
    });

    let mut controller = SessionController::new(
        session_config,
        transport,
        Box::new(microphone),
        Box::new(speaker),
    );
    let handle = controller.handle();
    let printer = tokio::spawn(print_updates(handle.subscribe(), args.json));

    let monitor_token = CancellationToken::new();
    if args.no_network_probe {
        log::info!("Network probe disabled, assuming online");
    } else {
        let monitor = NetworkMonitor::default();
        if !monitor.probe().await {
            handle.set_online(false);
        }
        tokio::spawn(monitor.run(handle.clone(), monitor_token.clone()));
    }

    handle.start();
    println!("🎧 Session starting, press Ctrl+C to exit");

    tokio::select! {
        _ = controller.run() => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down...");
        }
    }

    monitor_token.cancel();
    controller.stop();
    drop(controller);
    printer.abort();

    println!("\n👋 Goodbye!");
    Ok(())
}

use crate::prompts;
use clap::ValueEnum;
use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Puck";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format: {reason}")]
    InvalidKeyFormat { reason: String },
}

/// Credentials for the remote speech service
#[derive(Debug)]
pub struct ApiConfig {
    pub gemini_key: SecretBox<String>,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let key = env::var(API_KEY_ENV)
            .map_err(|_| ConfigError::MissingEnvVar(API_KEY_ENV.to_string()))?;
        Self::validate_key_format(&key)?;

        Ok(Self {
            gemini_key: SecretBox::new(Box::new(key)),
        })
    }

    fn validate_key_format(key: &str) -> Result<(), ConfigError> {
        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                reason: "API key cannot be empty".to_string(),
            });
        }
        // Google API keys start with "AIza"
        if !key.starts_with("AIza") {
            return Err(ConfigError::InvalidKeyFormat {
                reason: "Gemini API keys should start with 'AIza'".to_string(),
            });
        }
        Ok(())
    }

    /// Get the Gemini API key (use only when building the connection URL)
    pub fn gemini_key(&self) -> &str {
        self.gemini_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Conversation mode, selects the system instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    Translate,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum Backoff {
    Linear,
    Exponential,
}

/// Reconnect policy for recoverable session failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            strategy: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 1-based reconnect attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.strategy {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Whether completed user utterances require the awake sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum TranscriptGate {
    Always,
    RequireAwake,
}

#[derive(Debug, Clone)]
pub struct WakeConfig {
    pub phrases: Vec<String>,
    pub gate: TranscriptGate,
    /// Drop the input fragment that contained the wake phrase
    pub discard_trigger_fragment: bool,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrases: vec![
                "hey gemini".to_string(),
                "hello gemini".to_string(),
                "wake up".to_string(),
            ],
            gate: TranscriptGate::Always,
            discard_trigger_fragment: true,
        }
    }
}

/// Everything the session controller consumes at session start
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: Mode,
    pub polite: bool,
    pub model: String,
    pub voice: String,
    pub source_language: String,
    pub target_language: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub retry: RetryPolicy,
    pub wake: WakeConfig,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Translate,
            polite: false,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            source_language: "English".to_string(),
            target_language: "Korean".to_string(),
            input_transcription: true,
            output_transcription: true,
            retry: RetryPolicy::default(),
            wake: WakeConfig::default(),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl SessionConfig {
    pub fn system_instruction(&self) -> String {
        prompts::system_instruction(
            self.mode,
            self.polite,
            &self.source_language,
            &self.target_language,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::str::FromStr;

    #[test]
    fn test_key_validation() {
        assert!(ApiConfig::validate_key_format("AIzaSyExample123").is_ok());
        assert!(ApiConfig::validate_key_format("invalid").is_err());
        assert!(ApiConfig::validate_key_format("   ").is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        env::set_var(API_KEY_ENV, "AIzaSyTestKey");
        let config = ApiConfig::load().unwrap();
        assert_eq!(config.gemini_key(), "AIzaSyTestKey");
        env::remove_var(API_KEY_ENV);
    }

    #[test]
    #[serial]
    fn test_invalid_key_from_env() {
        env::set_var(API_KEY_ENV, "sk-not-a-google-key");
        assert!(matches!(
            ApiConfig::load(),
            Err(ConfigError::InvalidKeyFormat { .. })
        ));
        env::remove_var(API_KEY_ENV);
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy {
            strategy: Backoff::Linear,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_retries: 3,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(<Mode as FromStr>::from_str("translate").unwrap(), Mode::Translate);
        assert_eq!(<Mode as FromStr>::from_str("chat").unwrap(), Mode::Chat);
        assert_eq!(Mode::Chat.to_string(), "chat");
        assert_eq!(
            <TranscriptGate as FromStr>::from_str("require-awake").unwrap(),
            TranscriptGate::RequireAwake
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.mode, Mode::Translate);
        assert!(!config.polite);
        assert!(config.input_transcription);
        assert!(config.output_transcription);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.wake.gate, TranscriptGate::Always);
    }
}

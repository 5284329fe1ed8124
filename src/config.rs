//! Configuration types for the conversation widget.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, WidgetError};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "ELEVEN_LABS_API";

/// Placeholder in [`AgentConfig::interact_path`] replaced by the conversation id.
pub const CONVERSATION_ID_PLACEHOLDER: &str = "{conversation_id}";

/// Top-level configuration for the widget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Remote agent and endpoint settings.
    pub agent: AgentConfig,
    /// Local speech recognizer settings.
    pub recognition: RecognitionConfig,
    /// Audio format settings for the realtime channel.
    pub audio: AudioConfig,
    /// Playback loudness analyzer settings.
    pub analyzer: AnalyzerConfig,
    /// User-visible strings.
    pub labels: Labels,
}

/// Remote agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identifier of the agent to talk to.
    pub agent_id: String,
    /// Base URL of the REST API (credential and interaction endpoints).
    pub api_base_url: String,
    /// Realtime conversation endpoint, used directly for public agents.
    pub websocket_url: String,
    /// API key sent as `xi-api-key`. `None` falls back to [`API_KEY_ENV`].
    pub api_key: Option<String>,
    /// Whether to request a signed URL (private agents) or connect directly.
    pub use_signed_url: bool,
    /// Path of the signed-URL endpoint, relative to `api_base_url`.
    pub signed_url_path: String,
    /// Path template of the interaction fallback endpoint.
    ///
    /// Must contain `{conversation_id}`.
    pub interact_path: String,
    /// Whether the realtime channel accepts typed text.
    ///
    /// Text-only deployments turn this off, which routes typed input through
    /// the HTTP interaction fallback.
    pub text_input: bool,
    /// Timeout for REST calls in seconds.
    pub request_timeout_secs: u64,
    /// How long to wait for the session handshake in seconds.
    pub handshake_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            api_base_url: "https://api.elevenlabs.io".to_owned(),
            websocket_url: "wss://api.elevenlabs.io/v1/convai/conversation".to_owned(),
            api_key: None,
            use_signed_url: true,
            signed_url_path: "/v1/convai/conversation/get_signed_url".to_owned(),
            interact_path: "/v1/conversations/{conversation_id}/interact".to_owned(),
            text_input: true,
            request_timeout_secs: 30,
            handshake_timeout_secs: 10,
        }
    }
}

impl AgentConfig {
    /// The API key from config, or from the environment if unset.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }

    /// Full URL of the interaction endpoint for a conversation.
    pub fn interact_url(&self, conversation_id: &str) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        let path = self
            .interact_path
            .replace(CONVERSATION_ID_PLACEHOLDER, conversation_id);
        format!("{base}{path}")
    }

    /// Full URL of the signed-URL endpoint (without query string).
    pub fn signed_url_endpoint(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        format!("{base}{}", self.signed_url_path)
    }
}

/// How muting affects the local microphone adapter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteStrategy {
    /// Only disable the capture track; the recognizer keeps running.
    TrackOnly,
    /// Disable the capture track and pause the recognizer.
    #[default]
    TrackAndRecognizer,
}

/// Local speech recognizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// BCP-47 language tag handed to the recognizer.
    pub language: String,
    /// Keep listening across utterances.
    pub continuous: bool,
    /// Report partial hypotheses as hints.
    pub interim_results: bool,
    /// Mute behaviour.
    pub mute_strategy: MuteStrategy,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "de-DE".to_owned(),
            continuous: true,
            interim_results: true,
            mute_strategy: MuteStrategy::default(),
        }
    }
}

/// Audio format settings for the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of captured microphone audio, in Hz. Audio is resampled
    /// when the agent asks for a different rate.
    pub input_sample_rate: u32,
    /// Sample rate assumed for agent audio when the handshake does not say.
    pub output_sample_rate: u32,
    /// Grace period after the last agent audio before speaking ends, in ms.
    pub speaking_tail_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 16_000,
            speaking_tail_ms: 250,
        }
    }
}

/// Playback analyzer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// FFT window size (must be a power of two).
    pub fft_size: usize,
    /// Interval between level updates in ms (one animation frame).
    pub frame_interval_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            frame_interval_ms: 16,
        }
    }
}

/// User-visible strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Labels {
    /// Shown when no session credential could be obtained.
    pub credential_error: String,
    /// Shown when the session connection could not be opened.
    pub connection_error: String,
    /// Prefix for errors reported by the agent session.
    pub agent_error_prefix: String,
    /// Shown when typed text could not be sent over the session.
    pub send_failed: String,
    /// Synthetic agent message when the interaction fallback fails.
    pub fallback_error: String,
    /// Synthetic agent message when no send path is available.
    pub fallback_unavailable: String,
    /// Shown when unmuting is refused by the platform.
    pub microphone_permission_denied: String,
    /// Transcript label for user messages.
    pub user_label: String,
    /// Transcript label for agent messages.
    pub agent_label: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            credential_error: "Fehler: Es konnte keine Verbindung zum Agenten hergestellt werden. \
                               Bitte prüfe deine API-Konfiguration."
                .to_owned(),
            connection_error: "Fehler: Die Verbindung zum Agenten ist fehlgeschlagen.".to_owned(),
            agent_error_prefix: "Agentenfehler: ".to_owned(),
            send_failed: "Deine Nachricht konnte nicht gesendet werden.".to_owned(),
            fallback_error: "Entschuldigung, bei der Antwort ist ein Fehler aufgetreten. \
                             Bitte versuche es erneut."
                .to_owned(),
            fallback_unavailable: "Entschuldigung, Textnachrichten sind gerade nicht möglich."
                .to_owned(),
            microphone_permission_denied: "Mikrofon-Zugriff verweigert. Bitte erlaube den \
                                           Zugriff in deinen Einstellungen."
                .to_owned(),
            user_label: "Du".to_owned(),
            agent_label: "Anna".to_owned(),
        }
    }
}

impl WidgetConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| WidgetError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| WidgetError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/voice-widget/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::env::temp_dir().join("voice-widget-config"))
            .join("voice-widget")
            .join("config.toml")
    }

    /// Check settings that would otherwise fail later at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.agent.agent_id.trim().is_empty() {
            return Err(WidgetError::Config("agent.agent_id is empty".into()));
        }
        if !self
            .agent
            .interact_path
            .contains(CONVERSATION_ID_PLACEHOLDER)
        {
            return Err(WidgetError::Config(format!(
                "agent.interact_path must contain {CONVERSATION_ID_PLACEHOLDER}"
            )));
        }
        if !self.analyzer.fft_size.is_power_of_two() || self.analyzer.fft_size < 32 {
            return Err(WidgetError::Config(format!(
                "analyzer.fft_size must be a power of two >= 32, got {}",
                self.analyzer.fft_size
            )));
        }
        if self.analyzer.frame_interval_ms == 0 {
            return Err(WidgetError::Config(
                "analyzer.frame_interval_ms must be > 0".into(),
            ));
        }
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(WidgetError::Config("audio sample rates must be > 0".into()));
        }
        Ok(())
    }
}

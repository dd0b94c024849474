//! Configuration management for the signaling client

use crate::connection::ConnectionConfig;
use crate::error::ConnectionError;
use crate::signaling::options::codec_or_default;
use crate::signaling::{AudioCodec, NegotiationOptions, Rid, Role, VideoCodec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Signaling endpoint configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Video configuration
    #[serde(default)]
    pub video: VideoConfig,

    /// Audio configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// Simulcast configuration
    #[serde(default)]
    pub simulcast: SimulcastConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// WebSocket URL of the signaling server
    #[serde(default = "default_url")]
    pub url: String,

    /// Channel to join
    #[serde(default)]
    pub channel_id: String,

    /// Seconds to wait for the server's offer
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Seconds to wait for the close acknowledgment
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            channel_id: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            close_timeout_secs: default_close_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// "upstream" or "downstream"
    #[serde(default = "default_role")]
    pub role: Role,

    #[serde(default)]
    pub multistream: bool,

    /// Sent verbatim in the `connect` message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            multistream: false,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// "default", "VP8", "VP9" or "H264"
    #[serde(default, with = "codec_or_default")]
    pub codec: Option<VideoCodec>,

    /// Bit rate in kbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            codec: None,
            bit_rate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// "default", "OPUS" or "PCMU"
    #[serde(default, with = "codec_or_default")]
    pub codec: Option<AudioCodec>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            codec: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulcastConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Rid requested by a downstream session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<Rid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConnectionError> {
        self.signaling_url()?;

        if self.signaling.channel_id.trim().is_empty() {
            return Err(ConnectionError::Configuration("Channel id must not be empty".into()));
        }

        if self.signaling.connect_timeout_secs == 0 {
            return Err(ConnectionError::Configuration(
                "Connect timeout must be non-zero".into(),
            ));
        }

        if self.signaling.close_timeout_secs == 0 {
            return Err(ConnectionError::Configuration(
                "Close timeout must be non-zero".into(),
            ));
        }

        if self.video.bit_rate == Some(0) {
            return Err(ConnectionError::Configuration(
                "Video bit rate must be non-zero".into(),
            ));
        }

        Ok(())
    }

    fn signaling_url(&self) -> Result<Url, ConnectionError> {
        let url = Url::parse(&self.signaling.url).map_err(|e| {
            ConnectionError::Configuration(format!(
                "Invalid signaling URL {}: {}",
                self.signaling.url, e
            ))
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(ConnectionError::Configuration(format!(
                "Signaling URL must use ws or wss, got {}",
                scheme
            ))),
        }
    }

    pub fn connection_config(&self) -> Result<ConnectionConfig, ConnectionError> {
        let mut config =
            ConnectionConfig::new(self.signaling_url()?, self.signaling.channel_id.clone());
        config.connect_timeout = Duration::from_secs(self.signaling.connect_timeout_secs);
        config.close_timeout = Duration::from_secs(self.signaling.close_timeout_secs);
        Ok(config)
    }

    pub fn negotiation_options(&self) -> NegotiationOptions {
        NegotiationOptions {
            video_enabled: self.video.enabled,
            video_codec: self.video.codec,
            video_bit_rate: self.video.bit_rate,
            audio_enabled: self.audio.enabled,
            audio_codec: self.audio.codec,
            multistream: self.session.multistream,
            simulcast: self.simulcast.enabled,
            simulcast_rid: self.simulcast.rid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut cfg = Config::default();
        cfg.signaling.channel_id = "sora".to_string();
        cfg
    }

    #[test]
    fn validate_requires_channel_id() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_websocket_urls() {
        let mut cfg = valid();
        cfg.signaling.url = "https://example.com/signaling".to_string();
        assert!(matches!(cfg.validate(), Err(ConnectionError::Configuration(_))));

        cfg.signaling.url = "not a url".to_string();
        assert!(matches!(cfg.validate(), Err(ConnectionError::Configuration(_))));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut cfg = valid();
        cfg.signaling.connect_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_close_timeout() {
        let mut cfg = valid();
        cfg.signaling.close_timeout_secs = 0;
        assert!(matches!(cfg.validate(), Err(ConnectionError::Configuration(_))));
    }

    #[test]
    fn parses_full_file() {
        let cfg: Config = toml::from_str(
            r#"
            [signaling]
            url = "wss://sora.example.com/signaling"
            channel_id = "room"
            connect_timeout_secs = 10

            [session]
            role = "downstream"
            multistream = true
            metadata = { access_token = "secret" }

            [video]
            codec = "VP9"
            bit_rate = 2500

            [audio]
            codec = "default"

            [simulcast]
            enabled = true
            rid = "r1"
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.session.role, Role::Downstream);
        assert_eq!(cfg.session.metadata, Some(serde_json::json!({"access_token": "secret"})));

        let connection = cfg.connection_config().unwrap();
        assert_eq!(connection.channel_id, "room");
        assert_eq!(connection.connect_timeout, Duration::from_secs(10));
        assert_eq!(connection.close_timeout, Duration::from_secs(5));

        let options = cfg.negotiation_options();
        assert_eq!(options.video_codec, Some(VideoCodec::VP9));
        assert_eq!(options.video_bit_rate, Some(2500));
        assert_eq!(options.audio_codec, None);
        assert!(options.multistream);
        assert!(options.simulcast);
        assert_eq!(options.simulcast_rid, Some(Rid::R1));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(&PathBuf::from("/nonexistent/signaling-core.toml")).unwrap();
        assert_eq!(cfg.signaling.connect_timeout_secs, 30);
        assert_eq!(cfg.session.role, Role::Upstream);
        assert_eq!(cfg.negotiation_options(), NegotiationOptions::default());
    }
}

fn default_url() -> String {
    "wss://localhost/signaling".to_string()
}

fn default_role() -> Role {
    Role::Upstream
}

fn default_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_secs() -> u64 { 30 }
fn default_close_timeout_secs() -> u64 { 5 }

//! Signaling core configuration

use crate::rtp_parameters::{
    CapabilityKind, RtcpFeedback, RtpCapabilities, RtpCodecCapability, RtpHeaderExtension,
};
use crate::types::MediaKind;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    pub logging: LoggingConfig,
    pub room: RoomConfig,
}

/// Output format of the `fmt` layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, for log shippers
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Append to this file instead of writing to stdout
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_path: None,
        }
    }
}

/// Media capabilities new rooms are created with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub codecs: Vec<RtpCodecCapability>,
    pub header_extensions: Vec<RtpHeaderExtension>,
    pub fec_mechanisms: Vec<String>,
}

impl RoomConfig {
    /// Flat capability list to hand to `Room::create`
    #[must_use]
    pub fn capabilities(&self) -> RtpCapabilities {
        RtpCapabilities {
            codecs: self.codecs.clone(),
            header_extensions: self.header_extensions.clone(),
            fec_mechanisms: self.fec_mechanisms.clone(),
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        let video_feedback = || {
            vec![
                RtcpFeedback::new("nack"),
                RtcpFeedback::new("nack").with_parameter("pli"),
                RtcpFeedback::new("ccm").with_parameter("fir"),
                RtcpFeedback::new("goog-remb"),
            ]
        };
        let rtx = |payload_type: u8, apt: u32| RtpCodecCapability {
            kind: MediaKind::Video.into(),
            mime_type: "video/rtx".to_string(),
            preferred_payload_type: payload_type,
            clock_rate: 90000,
            num_channels: None,
            parameters: [("apt".to_string(), apt.into())].into_iter().collect(),
            rtcp_feedback: Vec::new(),
        };

        Self {
            codecs: vec![
                RtpCodecCapability {
                    kind: MediaKind::Audio.into(),
                    mime_type: "audio/opus".to_string(),
                    preferred_payload_type: 111,
                    clock_rate: 48000,
                    num_channels: Some(2),
                    parameters: [("useinbandfec".to_string(), 1u32.into())]
                        .into_iter()
                        .collect(),
                    rtcp_feedback: Vec::new(),
                },
                RtpCodecCapability {
                    kind: MediaKind::Video.into(),
                    mime_type: "video/VP8".to_string(),
                    preferred_payload_type: 100,
                    clock_rate: 90000,
                    num_channels: None,
                    parameters: Default::default(),
                    rtcp_feedback: video_feedback(),
                },
                rtx(101, 100),
                RtpCodecCapability {
                    kind: MediaKind::Video.into(),
                    mime_type: "video/H264".to_string(),
                    preferred_payload_type: 102,
                    clock_rate: 90000,
                    num_channels: None,
                    parameters: [
                        ("packetization-mode".to_string(), 1u32.into()),
                        ("profile-level-id".to_string(), "42e01f".into()),
                        ("level-asymmetry-allowed".to_string(), 1u32.into()),
                    ]
                    .into_iter()
                    .collect(),
                    rtcp_feedback: video_feedback(),
                },
                rtx(103, 102),
            ],
            header_extensions: vec![
                header_extension(
                    MediaKind::Audio,
                    "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
                    1,
                ),
                header_extension(
                    MediaKind::Video,
                    "urn:ietf:params:rtp-hdrext:toffset",
                    2,
                ),
                header_extension(
                    MediaKind::Video,
                    "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
                    3,
                ),
                header_extension(MediaKind::Video, "urn:3gpp:video-orientation", 4),
            ],
            fec_mechanisms: Vec::new(),
        }
    }
}

fn header_extension(kind: MediaKind, uri: &str, preferred_id: u8) -> RtpHeaderExtension {
    RtpHeaderExtension {
        kind: CapabilityKind::Media(kind),
        uri: uri.to_string(),
        preferred_id,
    }
}

impl SfuConfig {
    /// Load configuration from file and environment variables
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (`SFU_LOGGING_LEVEL`, ...)
    /// 2. Config file (if provided and present)
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SFU")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SfuConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);

        let caps = config.room.capabilities();
        assert_eq!(caps.codecs_for(MediaKind::Audio).count(), 1);
        assert_eq!(caps.codecs_for(MediaKind::Video).count(), 4);
        assert_eq!(caps.codecs_for(MediaKind::Depth).count(), 0);
        assert!(caps
            .codecs
            .iter()
            .all(|codec| codec.kind != CapabilityKind::Any));
    }

    #[test]
    fn test_from_file_keeps_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\nformat = \"json\"").unwrap();

        let config = SfuConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.file_path.is_none());
        // Untouched sections fall back to their defaults
        assert_eq!(config.room.codecs.len(), 5);
    }

    #[test]
    fn test_missing_file_is_ignored() {
        let config = SfuConfig::from_file("/nonexistent/sfu.toml").unwrap();
        assert_eq!(config.room.header_extensions.len(), 4);
    }
}

//! RTP capability and parameter data model
//!
//! Capabilities describe what a room can negotiate (the menu), parameters
//! describe what a producer or consumer actually negotiated. Both are plain
//! serde values using camelCase field names on the wire.

use crate::types::MediaKind;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Single codec specific parameter value (`fmtp` entry)
///
/// Numbers keep whatever JSON gave them (negative, fractional or larger
/// than 32 bits), so an unusual value never fails the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Number(serde_json::Number),
    String(String),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<u32> for ParameterValue {
    fn from(n: u32) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for ParameterValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for ParameterValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Codec specific parameters, kept in declaration order
pub type CodecParameters = IndexMap<String, ParameterValue>;

/// Transport layer and codec-specific feedback message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

impl RtcpFeedback {
    pub fn new(r#type: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            parameter: None,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }
}

/// Media kind a capability entry applies to
///
/// On the wire the wildcard is the empty string. Strings that name no known
/// kind are preserved as `Unknown` so that aggregation can drop them instead
/// of failing the whole capability list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    #[default]
    Any,
    Media(MediaKind),
    Unknown(String),
}

impl CapabilityKind {
    /// Whether an entry tagged with this kind belongs to `kind`
    #[must_use]
    pub fn applies_to(&self, kind: MediaKind) -> bool {
        match self {
            Self::Any => true,
            Self::Media(own) => *own == kind,
            Self::Unknown(_) => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => "",
            Self::Media(kind) => kind.as_str(),
            Self::Unknown(raw) => raw,
        }
    }
}

impl From<MediaKind> for CapabilityKind {
    fn from(kind: MediaKind) -> Self {
        Self::Media(kind)
    }
}

impl Serialize for CapabilityKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CapabilityKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "" => Self::Any,
            other => other
                .parse::<MediaKind>()
                .map_or_else(|_| Self::Unknown(raw.clone()), Self::Media),
        })
    }
}

/// Codec entry of a capability set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    #[serde(default)]
    pub kind: CapabilityKind,
    /// The codec MIME media type/subtype (e.g. `audio/opus`)
    pub mime_type: String,
    #[serde(alias = "payloadType")]
    pub preferred_payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_channels: Option<u8>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: CodecParameters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// Codec name as it appears in `a=rtpmap` (the mime subtype)
    #[must_use]
    pub fn codec_name(&self) -> &str {
        codec_name(&self.mime_type)
    }
}

/// Header extension entry of a capability set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    #[serde(default)]
    pub kind: CapabilityKind,
    pub uri: String,
    pub preferred_id: u8,
}

/// Capability list, either flat (room input) or specialized to one kind
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
    #[serde(default)]
    pub fec_mechanisms: Vec<String>,
}

impl RtpCapabilities {
    /// Codecs usable for `kind`, wildcard entries included
    pub fn codecs_for(&self, kind: MediaKind) -> impl Iterator<Item = &RtpCodecCapability> {
        self.codecs.iter().filter(move |codec| codec.kind.applies_to(kind))
    }

    /// Header extensions usable for `kind`, wildcard entries included
    pub fn header_extensions_for(
        &self,
        kind: MediaKind,
    ) -> impl Iterator<Item = &RtpHeaderExtension> {
        self.header_extensions
            .iter()
            .filter(move |ext| ext.kind.applies_to(kind))
    }
}

/// Negotiated codec of a producer or consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: CodecParameters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    #[must_use]
    pub fn codec_name(&self) -> &str {
        codec_name(&self.mime_type)
    }
}

/// Negotiated header extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpHeaderExtensionParameters {
    pub uri: String,
    pub id: u8,
}

/// RTX stream of an encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpEncodingParametersRtx {
    pub ssrc: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpEncodingParameters {
    pub ssrc: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtx: Option<RtpEncodingParametersRtx>,
}

impl RtpEncodingParameters {
    /// RTX SSRC, if one is present and non-zero
    #[must_use]
    pub fn rtx_ssrc(&self) -> Option<u32> {
        self.rtx.map(|rtx| rtx.ssrc).filter(|ssrc| *ssrc != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default = "default_reduced_size")]
    pub reduced_size: bool,
}

const fn default_reduced_size() -> bool {
    true
}

impl Default for RtcpParameters {
    fn default() -> Self {
        Self {
            cname: None,
            reduced_size: true,
        }
    }
}

/// RTP parameters negotiated for a producer or consumer
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default)]
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(default)]
    pub rtcp: RtcpParameters,
    /// Application supplied values carried along untouched (e.g. `msid`)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub user_parameters: serde_json::Map<String, serde_json::Value>,
}

impl RtpParameters {
    /// Stream identifier supplied by the application, if any
    #[must_use]
    pub fn msid(&self) -> Option<&str> {
        self.user_parameters
            .get("msid")
            .and_then(serde_json::Value::as_str)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseMimeTypeError {
    #[error("Mime type must be in the form type/subtype: {0}")]
    Malformed(String),
    #[error("Unsupported mime type kind: {0}")]
    UnsupportedKind(String),
}

/// Parsed codec mime type (`video/VP8`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RtpCodecMimeType {
    pub kind: MediaKind,
    pub subtype: String,
}

impl RtpCodecMimeType {
    pub fn new(kind: MediaKind, subtype: impl Into<String>) -> Self {
        Self {
            kind,
            subtype: subtype.into(),
        }
    }
}

impl FromStr for RtpCodecMimeType {
    type Err = ParseMimeTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, subtype) = s
            .split_once('/')
            .filter(|(kind, subtype)| !kind.is_empty() && !subtype.is_empty())
            .ok_or_else(|| ParseMimeTypeError::Malformed(s.to_string()))?;
        let kind = kind
            .to_ascii_lowercase()
            .parse::<MediaKind>()
            .map_err(|_| ParseMimeTypeError::UnsupportedKind(kind.to_string()))?;

        Ok(Self::new(kind, subtype))
    }
}

impl fmt::Display for RtpCodecMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)
    }
}

fn codec_name(mime_type: &str) -> &str {
    mime_type
        .split_once('/')
        .map_or(mime_type, |(_, subtype)| subtype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_kind_wire_format() {
        let codec: RtpCodecCapability = serde_json::from_value(json!({
            "kind": "",
            "mimeType": "video/rtx",
            "preferredPayloadType": 97,
            "clockRate": 90000
        }))
        .unwrap();
        assert_eq!(codec.kind, CapabilityKind::Any);

        let codec: RtpCodecCapability = serde_json::from_value(json!({
            "kind": "hologram",
            "mimeType": "hologram/foo",
            "payloadType": 100,
            "clockRate": 90000
        }))
        .unwrap();
        assert_eq!(codec.kind, CapabilityKind::Unknown("hologram".to_string()));
        assert_eq!(codec.preferred_payload_type, 100);

        let value = serde_json::to_value(CapabilityKind::Any).unwrap();
        assert_eq!(value, json!(""));
        let value = serde_json::to_value(CapabilityKind::Media(MediaKind::Depth)).unwrap();
        assert_eq!(value, json!("depth"));
    }

    #[test]
    fn test_codec_parameters_keep_order() {
        let codec: RtpCodecCapability = serde_json::from_value(json!({
            "kind": "video",
            "mimeType": "video/H264",
            "preferredPayloadType": 102,
            "clockRate": 90000,
            "parameters": {
                "packetization-mode": 1,
                "level-asymmetry-allowed": 1,
                "profile-level-id": "42e01f"
            }
        }))
        .unwrap();

        let keys: Vec<_> = codec.parameters.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["packetization-mode", "level-asymmetry-allowed", "profile-level-id"]
        );
        assert_eq!(
            codec.parameters["profile-level-id"],
            ParameterValue::from("42e01f")
        );
        assert_eq!(codec.codec_name(), "H264");
    }

    #[test]
    fn test_signed_and_fractional_parameters() {
        let caps: RtpCapabilities = serde_json::from_value(json!({
            "codecs": [{
                "kind": "audio",
                "mimeType": "audio/opus",
                "preferredPayloadType": 111,
                "clockRate": 48000,
                "numChannels": 2,
                "parameters": {
                    "x-google-min-bitrate": -1,
                    "ptime": 2.5,
                    "maxaveragebitrate": 5000000000u64
                }
            }]
        }))
        .unwrap();

        let parameters = &caps.codecs[0].parameters;
        assert_eq!(parameters["x-google-min-bitrate"], ParameterValue::from(-1i64));
        assert_eq!(parameters["ptime"].to_string(), "2.5");
        assert_eq!(parameters["maxaveragebitrate"].to_string(), "5000000000");
    }

    #[test]
    fn test_mime_type_parsing() {
        let mime: RtpCodecMimeType = "video/VP8".parse().unwrap();
        assert_eq!(mime.kind, MediaKind::Video);
        assert_eq!(mime.subtype, "VP8");
        assert_eq!(mime.to_string(), "video/VP8");

        assert_eq!(
            "vp8".parse::<RtpCodecMimeType>(),
            Err(ParseMimeTypeError::Malformed("vp8".to_string()))
        );
        assert!(matches!(
            "text/plain".parse::<RtpCodecMimeType>(),
            Err(ParseMimeTypeError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_rtx_ssrc_ignores_zero() {
        let encoding = RtpEncodingParameters {
            ssrc: 1111,
            rtx: Some(RtpEncodingParametersRtx { ssrc: 0 }),
        };
        assert_eq!(encoding.rtx_ssrc(), None);

        let encoding = RtpEncodingParameters {
            ssrc: 1111,
            rtx: Some(RtpEncodingParametersRtx { ssrc: 2222 }),
        };
        assert_eq!(encoding.rtx_ssrc(), Some(2222));
    }

    #[test]
    fn test_msid_from_user_parameters() {
        let params: RtpParameters = serde_json::from_value(json!({
            "codecs": [],
            "userParameters": { "msid": "stream-1 track-1" }
        }))
        .unwrap();
        assert_eq!(params.msid(), Some("stream-1 track-1"));
        assert!(params.rtcp.reduced_size);
        assert_eq!(RtpParameters::default().msid(), None);
    }
}

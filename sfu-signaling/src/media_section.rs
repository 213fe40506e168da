//! Structured SDP media section
//!
//! `MediaObject` is the value handed to the SDP assembly layer; field names
//! follow the usual `sdp-transform` object layout so it serializes straight
//! into what that layer expects.

use crate::transport::{IceCandidateTcpType, IceCandidateType, Protocol};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Transport profile of every media section this core produces
pub const MEDIA_PROTOCOL: &str = "UDP/TLS/RTP/SAVPF";

/// Port used while the real address lives in ICE candidates
pub const PLACEHOLDER_PORT: u16 = 7;

/// Payload list of a section without any usable codec
pub const UNAVAILABLE_PAYLOADS: &str = "0";

/// RTCP is always multiplexed, so every candidate is component 1
pub const ICE_COMPONENT_RTP: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sendrecv,
    Sendonly,
    Recvonly,
    Inactive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sendrecv => "sendrecv",
            Self::Sendonly => "sendonly",
            Self::Recvonly => "recvonly",
            Self::Inactive => "inactive",
        })
    }
}

/// `a=setup` value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsSetup {
    Actpass,
    Active,
    Passive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub version: u8,
    pub ip: IpAddr,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            version: 4,
            ip: IpAddr::from([127, 0, 0, 1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateLine {
    pub component: u8,
    pub foundation: String,
    pub ip: IpAddr,
    pub port: u16,
    pub priority: u32,
    pub transport: Protocol,
    #[serde(rename = "type")]
    pub r#type: IceCandidateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcptype: Option<IceCandidateTcpType>,
}

/// `a=rtpmap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpMap {
    pub payload: u8,
    pub codec: String,
    pub rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<u8>,
}

/// `a=fmtp`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fmtp {
    pub payload: u8,
    pub config: String,
}

/// `a=rtcp-fb`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFbLine {
    pub payload: u8,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

/// `a=extmap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtMap {
    pub value: u8,
    pub uri: String,
}

/// `a=ssrc`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsrcLine {
    pub id: u32,
    pub attribute: String,
    pub value: String,
}

/// `a=ssrc-group`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsrcGroup {
    pub semantics: String,
    pub ssrcs: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaObject {
    #[serde(rename = "type")]
    pub r#type: String,
    pub port: u16,
    pub protocol: String,
    pub payloads: String,
    pub connection: Connection,
    pub mid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_ufrag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_pwd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<CandidateLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<DtlsSetup>,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtp: Vec<RtpMap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fmtp: Vec<Fmtp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_fb: Vec<RtcpFbLine>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext: Vec<ExtMap>,
    #[serde(default)]
    pub rtcp_mux: bool,
    #[serde(default)]
    pub rtcp_rsize: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssrcs: Vec<SsrcLine>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssrc_groups: Vec<SsrcGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msid: Option<String>,
}

impl MediaObject {
    /// A section with port 0 is rejected/unavailable
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.port != 0
    }

    /// Payload types as listed on the `m=` line
    pub fn payload_types(&self) -> impl Iterator<Item = &str> {
        self.payloads.split_whitespace()
    }
}

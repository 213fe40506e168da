//! Minimal RTP packet view (RFC 3550)
//!
//! Only the fixed header is decoded. Header extension contents are skipped and
//! trailing padding is stripped; the payload is a zero-copy slice of the input.

use bytes::Bytes;
use thiserror::Error;

const RTP_VERSION: u8 = 2;
const FIXED_HEADER_LEN: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtpPacketError {
    #[error("Buffer too short for an RTP header: {0} bytes")]
    TooShort(usize),

    #[error("Bad RTP version: {0}")]
    BadVersion(u8),

    #[error("CSRC list needs {expected} bytes, {remaining} remain")]
    CsrcCountMismatch { expected: usize, remaining: usize },

    #[error("RTP header extension too short")]
    HeaderExtensionTooShort,

    #[error("Padding length {padding} exceeds payload of {payload} bytes")]
    PaddingTooShort { padding: usize, payload: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
    /// Profile-specific id of the header extension, if present
    pub extension_profile: Option<u16>,
    payload: Bytes,
}

impl RtpPacket {
    pub fn parse(buf: Bytes) -> Result<Self, RtpPacketError> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(RtpPacketError::TooShort(buf.len()));
        }

        let b0 = buf[0];
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(RtpPacketError::BadVersion(version));
        }
        let has_padding = b0 & 0x20 != 0;
        let has_extension = b0 & 0x10 != 0;
        let csrc_count = usize::from(b0 & 0x0F);

        let b1 = buf[1];
        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7F;
        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut offset = FIXED_HEADER_LEN;
        let csrc_len = csrc_count * 4;
        if buf.len() < offset + csrc_len {
            return Err(RtpPacketError::CsrcCountMismatch {
                expected: csrc_len,
                remaining: buf.len() - offset,
            });
        }
        let csrcs = buf[offset..offset + csrc_len]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        offset += csrc_len;

        let mut extension_profile = None;
        if has_extension {
            if buf.len() < offset + 4 {
                return Err(RtpPacketError::HeaderExtensionTooShort);
            }
            let profile = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let words = usize::from(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
            offset += 4;
            if buf.len() < offset + words * 4 {
                return Err(RtpPacketError::HeaderExtensionTooShort);
            }
            offset += words * 4;
            extension_profile = Some(profile);
        }

        let mut end = buf.len();
        if has_padding {
            let padding = usize::from(buf[end - 1]);
            let payload = end - offset;
            if padding == 0 || padding > payload {
                return Err(RtpPacketError::PaddingTooShort { padding, payload });
            }
            end -= padding;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrcs,
            extension_profile,
            payload: buf.slice(offset..end),
        })
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

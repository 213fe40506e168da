//! Codec-aware packet classification
//!
//! Forwarding decisions such as answering a PLI need to know whether a packet
//! starts a key frame. That depends on the payload format, so each codec
//! family registers its own predicate. Families are keyed by the lowercase
//! mime subtype (`vp8`, `h264`).

pub mod h264;
pub mod vp8;

use crate::rtp_packet::RtpPacket;
use crate::rtp_parameters::RtpCodecMimeType;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Decide from an RTP payload whether it starts a key frame
pub type KeyFramePredicate = fn(&[u8]) -> bool;

static DEFAULT_REGISTRY: LazyLock<CodecRegistry> = LazyLock::new(CodecRegistry::with_defaults);

#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    families: HashMap<String, KeyFramePredicate>,
}

impl CodecRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every family this crate understands
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("vp8", vp8::is_key_frame);
        registry.register("h264", h264::is_key_frame);
        registry
    }

    /// Add or replace the predicate of a family
    pub fn register(&mut self, family: &str, predicate: KeyFramePredicate) {
        self.families.insert(family.to_ascii_lowercase(), predicate);
    }

    #[must_use]
    pub fn is_known(&self, mime_type: &RtpCodecMimeType) -> bool {
        self.predicate(mime_type).is_some()
    }

    /// Unknown families and empty payloads are never key frames
    #[must_use]
    pub fn is_key_frame(&self, mime_type: &RtpCodecMimeType, packet: &RtpPacket) -> bool {
        let payload = packet.payload();
        if payload.is_empty() {
            return false;
        }
        self.predicate(mime_type)
            .is_some_and(|predicate| predicate(payload))
    }

    fn predicate(&self, mime_type: &RtpCodecMimeType) -> Option<KeyFramePredicate> {
        self.families
            .get(&mime_type.subtype.to_ascii_lowercase())
            .copied()
    }
}

/// Whether the default registry can classify packets of this codec
#[must_use]
pub fn is_known(mime_type: &RtpCodecMimeType) -> bool {
    DEFAULT_REGISTRY.is_known(mime_type)
}

#[must_use]
pub fn is_key_frame(mime_type: &RtpCodecMimeType, packet: &RtpPacket) -> bool {
    DEFAULT_REGISTRY.is_key_frame(mime_type, packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaKind;
    use bytes::Bytes;

    fn packet(payload: &[u8]) -> RtpPacket {
        let mut raw = vec![0x80, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        raw.extend_from_slice(payload);
        RtpPacket::parse(Bytes::from(raw)).unwrap()
    }

    #[test]
    fn test_known_families() {
        assert!(is_known(&"video/VP8".parse().unwrap()));
        assert!(is_known(&"video/h264".parse().unwrap()));
        assert!(!is_known(&"video/AV1".parse().unwrap()));
        assert!(!is_known(&"audio/opus".parse().unwrap()));
    }

    #[test]
    fn test_unknown_codec_is_never_key_frame() {
        let mime = RtpCodecMimeType::new(MediaKind::Video, "VP9");
        for payload in [&[][..], &[0x10, 0x00][..], &[0xFF; 32][..], &[0x65, 0x88][..]] {
            assert!(!is_key_frame(&mime, &packet(payload)));
        }
    }

    #[test]
    fn test_dispatch_by_family() {
        let vp8 = RtpCodecMimeType::new(MediaKind::Video, "VP8");
        let h264 = RtpCodecMimeType::new(MediaKind::Video, "H264");

        // S=1 PID=0, then a payload header with P=0
        assert!(is_key_frame(&vp8, &packet(&[0x10, 0x00, 0x9D])));
        // IDR slice
        assert!(is_key_frame(&h264, &packet(&[0x65, 0x88])));
        assert!(!is_key_frame(&h264, &packet(&[])));
    }

    #[test]
    fn test_custom_family() {
        let mut registry = CodecRegistry::new();
        let mime = RtpCodecMimeType::new(MediaKind::Video, "AV1");
        assert!(!registry.is_known(&mime));

        registry.register("AV1", |payload| payload[0] & 0x08 != 0);
        assert!(registry.is_known(&mime));
        assert!(registry.is_key_frame(&mime, &packet(&[0x08])));
        assert!(!registry.is_key_frame(&mime, &packet(&[0x00])));
    }
}

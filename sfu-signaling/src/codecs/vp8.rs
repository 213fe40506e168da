//! VP8 RTP payload descriptor (RFC 7741)
//!
//! ```text
//!       0 1 2 3 4 5 6 7
//!      +-+-+-+-+-+-+-+-+
//!      |X|R|N|S|R| PID | (REQUIRED)
//!      +-+-+-+-+-+-+-+-+
//! X:   |I|L|T|K| RSV   | (OPTIONAL)
//!      +-+-+-+-+-+-+-+-+
//! I:   |M| PictureID   | (OPTIONAL, 15 bits when M is set)
//!      +-+-+-+-+-+-+-+-+
//! L:   |   TL0PICIDX   | (OPTIONAL)
//!      +-+-+-+-+-+-+-+-+
//! T/K: |TID|Y| KEYIDX  | (OPTIONAL)
//!      +-+-+-+-+-+-+-+-+
//! ```

/// Parsed payload descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadDescriptor {
    pub non_reference: bool,
    pub start_of_partition: bool,
    pub partition_index: u8,
    pub picture_id: Option<u16>,
    pub tl0_picture_index: Option<u8>,
    pub temporal_layer: Option<u8>,
    pub layer_sync: bool,
    pub key_index: Option<u8>,
    /// Offset of the VP8 payload header within the RTP payload
    pub header_len: usize,
}

impl PayloadDescriptor {
    /// `None` when the payload ends inside the descriptor
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let first = *payload.first()?;
        let mut descriptor = Self {
            non_reference: first & 0x20 != 0,
            start_of_partition: first & 0x10 != 0,
            partition_index: first & 0x07,
            ..Self::default()
        };
        let mut offset = 1;

        if first & 0x80 != 0 {
            let ext = *payload.get(offset)?;
            offset += 1;
            let has_picture_id = ext & 0x80 != 0;
            let has_tl0_picture_index = ext & 0x40 != 0;
            let has_tid = ext & 0x20 != 0;
            let has_key_index = ext & 0x10 != 0;

            if has_picture_id {
                let byte = *payload.get(offset)?;
                offset += 1;
                if byte & 0x80 != 0 {
                    let low = *payload.get(offset)?;
                    offset += 1;
                    descriptor.picture_id = Some((u16::from(byte & 0x7F) << 8) | u16::from(low));
                } else {
                    descriptor.picture_id = Some(u16::from(byte));
                }
            }

            if has_tl0_picture_index {
                descriptor.tl0_picture_index = Some(*payload.get(offset)?);
                offset += 1;
            }

            if has_tid || has_key_index {
                let byte = *payload.get(offset)?;
                offset += 1;
                if has_tid {
                    descriptor.temporal_layer = Some(byte >> 6);
                    descriptor.layer_sync = byte & 0x20 != 0;
                }
                if has_key_index {
                    descriptor.key_index = Some(byte & 0x1F);
                }
            }
        }

        descriptor.header_len = offset;
        Some(descriptor)
    }
}

/// Key frame iff this packet starts partition 0 and the VP8 payload header
/// has the inverse key frame flag (P) cleared
#[must_use]
pub fn is_key_frame(payload: &[u8]) -> bool {
    let Some(descriptor) = PayloadDescriptor::parse(payload) else {
        return false;
    };
    if !descriptor.start_of_partition || descriptor.partition_index != 0 {
        return false;
    }

    payload
        .get(descriptor.header_len)
        .is_some_and(|header| header & 0x01 == 0)
}

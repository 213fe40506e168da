//! H.264 RTP payload (RFC 6184)

const NAL_TYPE_MASK: u8 = 0x1F;
const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_STAP_A: u8 = 24;
const NAL_FU_A: u8 = 28;
const FU_START: u8 = 0x80;

const fn starts_key_frame(nal_type: u8) -> bool {
    matches!(nal_type, NAL_IDR | NAL_SPS)
}

/// Key frame iff the packet carries an IDR slice or an SPS, directly, inside
/// a STAP-A aggregate or as the first FU-A fragment
#[must_use]
pub fn is_key_frame(payload: &[u8]) -> bool {
    let Some(&indicator) = payload.first() else {
        return false;
    };

    match indicator & NAL_TYPE_MASK {
        NAL_STAP_A => stap_a_has_key_frame(&payload[1..]),
        NAL_FU_A => payload
            .get(1)
            .is_some_and(|header| header & FU_START != 0 && starts_key_frame(header & NAL_TYPE_MASK)),
        nal_type => starts_key_frame(nal_type),
    }
}

fn stap_a_has_key_frame(mut units: &[u8]) -> bool {
    while units.len() > 2 {
        let size = usize::from(u16::from_be_bytes([units[0], units[1]]));
        let Some(nal) = units.get(2..2 + size) else {
            return false;
        };
        if nal
            .first()
            .is_some_and(|header| starts_key_frame(header & NAL_TYPE_MASK))
        {
            return true;
        }
        units = &units[2 + size..];
    }
    false
}

use std::time::{SystemTime, UNIX_EPOCH};

const HEX: &[u8; 16] = b"0123456789abcdef";
const FINGERPRINT_HEX_DIGITS: usize = 12;

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Random version-4 UUID drawn from the thread-local `fastrand` generator.
#[must_use]
pub(crate) fn random_uuid() -> uuid::Uuid {
    uuid::Builder::from_random_bytes(fastrand::u128(..).to_le_bytes()).into_uuid()
}

#[must_use]
pub(crate) fn random_completion_id() -> String {
    let uuid = random_uuid();
    let mut out = String::with_capacity(9 + uuid::fmt::Hyphenated::LENGTH);
    out.push_str("chatcmpl-");
    out.push_str(uuid.hyphenated().encode_lower(&mut uuid::Uuid::encode_buffer()));
    out
}

#[must_use]
pub(crate) fn random_fingerprint() -> String {
    let mut out = String::with_capacity(3 + FINGERPRINT_HEX_DIGITS);
    out.push_str("fp_");
    push_u64_hex_lower(&mut out, fastrand::u64(..), FINGERPRINT_HEX_DIGITS);
    out
}

#[inline]
fn push_u64_hex_lower(out: &mut String, mut value: u64, digits: usize) {
    let mut buf = [b'0'; 16];
    let digits = digits.min(buf.len());
    let mut idx = digits;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in &buf[..digits] {
        out.push(char::from(*byte));
    }
}

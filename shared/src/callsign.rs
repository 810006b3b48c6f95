//! Callsign rules.

pub const MIN_CALLSIGN_LEN: usize = 3;
pub const MAX_CALLSIGN_LEN: usize = 11;

const FORBIDDEN: &[u8] = b"!@#$%*:& \t";

/// 3 to 11 printable ASCII characters, none of `!@#$%*:&`, space or tab.
pub fn is_valid_callsign(callsign: &str) -> bool {
    let len = callsign.len();
    (MIN_CALLSIGN_LEN..=MAX_CALLSIGN_LEN).contains(&len)
        && callsign
            .bytes()
            .all(|b| b.is_ascii_graphic() && !FORBIDDEN.contains(&b))
}

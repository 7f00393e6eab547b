//! Pure codecs: frame delimiting and diagnostic data decoding
//!
//! Nothing in this module performs I/O; the protocol engine feeds bytes in
//! and gets typed values out.

pub mod dtc;
pub mod frame;
pub mod pid;

/// Keyword markers that complete a frame even without the prompt char.
///
/// Order matters only for readability; matching scans for the earliest
/// occurrence of any marker.
pub const KEYWORD_MARKERS: &[&str] = &["UNABLE TO CONNECT", "NO DATA", "ERROR", "OK"];

/// The ELM327 prompt character, sent when the adapter is ready for the
/// next command.
pub const PROMPT: u8 = b'>';

/// Whether a completed frame signals that the ECU cannot answer the
/// request (as opposed to a transport problem).
pub fn is_negative(frame: &str) -> bool {
    frame.contains("NO DATA") || frame.contains("ERROR")
}

/// Extract the hex payload bytes from a cleaned frame.
///
/// Frames can carry non-hex tokens ("SEARCHING...", a stray prompt echo);
/// only tokens made entirely of hex digits count. Tokens concatenate
/// before pairing so both "410C1AF8" and "41 0C 1A F8" parse the same;
/// a trailing odd nibble is dropped.
pub fn hex_bytes(frame: &str) -> Vec<u8> {
    pair_bytes(&hex_digits(frame))
}

/// The concatenated hex digits of a frame, unpaired.
///
/// Kept separate from [`hex_bytes`] so callers that need to re-align on an
/// echo pattern (responses with headers enabled) can search the digit
/// stream before pairing.
pub fn hex_digits(frame: &str) -> String {
    frame
        .split_whitespace()
        .filter(|tok| !tok.is_empty() && tok.chars().all(|c| c.is_ascii_hexdigit()))
        .collect::<String>()
        .to_uppercase()
}

/// Pair a hex digit string into bytes, dropping a trailing odd nibble.
pub fn pair_bytes(digits: &str) -> Vec<u8> {
    let even = &digits[..digits.len() & !1];
    hex::decode(even).unwrap_or_default()
}

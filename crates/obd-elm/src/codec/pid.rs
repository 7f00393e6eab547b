//! PID response decoding

use chrono::Utc;
use obd_core::{DecodeError, DecodedReading, PidDefinition};
use tracing::trace;

use super::{hex_digits, is_negative, pair_bytes};

/// Decode a completed response frame against a PID definition.
///
/// NO DATA / ERROR frames mean the PID is unavailable on this ECU and
/// surface as [`DecodeError::NotSupported`]; callers must not treat that
/// as a connection fault.
pub fn decode_pid(def: &PidDefinition, frame: &str) -> Result<DecodedReading, DecodeError> {
    if is_negative(frame) {
        return Err(DecodeError::NotSupported);
    }

    let digits = hex_digits(frame);
    if digits.is_empty() {
        return Err(DecodeError::InvalidHex(frame.to_string()));
    }

    let data = data_bytes(def, &digits);
    trace!(pid = %def.command(), ?data, "decoded payload bytes");

    let needed = def.formula.required_bytes();
    if data.len() < needed {
        return Err(DecodeError::ShortFrame {
            needed,
            got: data.len(),
        });
    }

    Ok(DecodedReading {
        pid: def.command(),
        value: def.formula.evaluate(&data),
        unit: def.unit.clone(),
        raw_frame: frame.to_string(),
        captured_at: Utc::now(),
    })
}

/// Locate the data bytes that follow the service/PID echo.
///
/// With headers enabled the frame starts with a CAN id and length byte, so
/// a fixed skip misaligns; searching the digit stream for the echo pattern
/// (service id + 0x40, then the PID) realigns regardless of header shape.
/// Frames without a recognizable echo fall back to the definition's fixed
/// echo-byte skip.
fn data_bytes(def: &PidDefinition, digits: &str) -> Vec<u8> {
    if let Some(echo) = echo_pattern(def) {
        if let Some(pos) = digits.find(&echo) {
            return pair_bytes(&digits[pos + echo.len()..]);
        }
    }

    let bytes = pair_bytes(digits);
    let skip = def.echo_bytes().min(bytes.len());
    bytes[skip..].to_vec()
}

/// Hex text of the expected response echo: (mode | 0x40) then the PID code.
fn echo_pattern(def: &PidDefinition) -> Option<String> {
    let mode = u8::from_str_radix(&def.mode, 16).ok()?;
    Some(format!("{:02X}{}", mode | 0x40, def.pid.to_uppercase()))
}

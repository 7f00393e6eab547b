//! Trouble code block decoding (modes 03 / 07 / 0A)

use obd_core::{DtcStatus, TroubleCode};
use tracing::trace;

use super::{hex_digits, is_negative};
use crate::reference::SeverityTable;

/// Decode a DTC response block into trouble codes.
///
/// The payload starts behind the service-id echo and code-count byte;
/// every following four-character group is one code. All-zero groups are
/// CAN frame padding, not a real P0000, and are discarded.
pub fn decode_dtc_block(
    frame: &str,
    status: DtcStatus,
    severities: &SeverityTable,
) -> Vec<TroubleCode> {
    if is_negative(frame) {
        return Vec::new();
    }

    let digits = hex_digits(frame);
    let payload = match payload_digits(&digits, status) {
        Some(payload) => payload,
        None => return Vec::new(),
    };

    let mut codes = Vec::new();
    for group in payload.as_bytes().chunks_exact(4) {
        let group = std::str::from_utf8(group).expect("hex digits are ascii");
        let code = match decode_code(group) {
            Some(code) => code,
            None => continue,
        };
        if code == "P0000" {
            continue;
        }
        codes.push(TroubleCode {
            severity: severities.severity_of(&code),
            code,
            status,
        });
    }
    trace!(?status, count = codes.len(), "decoded DTC block");
    codes
}

/// Locate the code groups behind the service echo.
///
/// With headers enabled the echo is preceded by a CAN id and a length
/// byte, so a fixed skip misaligns; searching for the echo byte realigns
/// the payload the same way the PID decoder does. Frames with no
/// recognizable echo fall back to the fixed service+count skip.
fn payload_digits<'a>(digits: &'a str, status: DtcStatus) -> Option<&'a str> {
    let echo = match status {
        DtcStatus::Current => "43",
        DtcStatus::Pending => "47",
        DtcStatus::Permanent => "4A",
    };
    if let Some(pos) = digits.find(echo) {
        // Skip the echo byte and the code-count byte behind it.
        return digits.get(pos + 4..);
    }
    if digits.len() > 4 {
        digits.get(4..)
    } else {
        None
    }
}

/// Decode one four-hex-character group into a code string.
///
/// The top two bits of the first byte select the system letter; the
/// remaining fourteen bits render digit-wise as four hex digits
/// ("0171" -> P0171).
fn decode_code(group: &str) -> Option<String> {
    let b0 = u8::from_str_radix(&group[..2], 16).ok()?;
    let b1 = u8::from_str_radix(&group[2..], 16).ok()?;

    Some(format!(
        "{}{:01X}{:01X}{:01X}{:01X}",
        TroubleCode::system_prefix(b0),
        (b0 >> 4) & 0x03,
        b0 & 0x0F,
        (b1 >> 4) & 0x0F,
        b1 & 0x0F,
    ))
}

#[cfg(test)]
mod tests {
    use obd_core::DtcSeverity;
    use pretty_assertions::assert_eq;

    use super::*;

    fn codes_of(frame: &str) -> Vec<String> {
        decode_dtc_block(frame, DtcStatus::Current, &SeverityTable::default())
            .into_iter()
            .map(|c| c.code)
            .collect()
    }

    #[test]
    fn two_codes_from_mode_03_block() {
        assert_eq!(codes_of("43 02 01 71 04 20"), vec!["P0171", "P0420"]);
    }

    #[test]
    fn padding_p0000_is_discarded() {
        assert_eq!(codes_of("43 01 01 71 00 00 00 00"), vec!["P0171"]);
    }

    #[test]
    fn system_letters_from_top_bits() {
        // 0x44 0x20 -> C0420, 0xC1 0x00 -> U0100
        assert_eq!(codes_of("43 02 44 20 C1 00"), vec!["C0420", "U0100"]);
    }

    #[test]
    fn headers_on_frame_realigns_on_service_echo() {
        // ATH1 responses prefix the CAN id and length byte.
        assert_eq!(
            codes_of("7E8 06 43 02 01 71 04 20"),
            vec!["P0171", "P0420"]
        );
    }

    #[test]
    fn headers_on_pending_block_realigns_too() {
        let codes = decode_dtc_block(
            "7E8 04 47 01 03 00",
            DtcStatus::Pending,
            &SeverityTable::default(),
        );
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].code, "P0300");
        assert_eq!(codes[0].status, DtcStatus::Pending);
    }

    #[test]
    fn negative_response_yields_no_codes() {
        assert!(codes_of("NO DATA").is_empty());
        assert!(codes_of("ERROR").is_empty());
    }

    #[test]
    fn empty_block_yields_no_codes() {
        assert!(codes_of("43 00").is_empty());
    }

    #[test]
    fn severity_comes_from_the_table() {
        let codes = decode_dtc_block(
            "43 02 03 00 01 71",
            DtcStatus::Current,
            &SeverityTable::default(),
        );
        assert_eq!(codes[0].code, "P0300");
        assert_eq!(codes[0].severity, DtcSeverity::Critical);
        assert_eq!(codes[1].code, "P0171");
        assert_eq!(codes[1].severity, DtcSeverity::High);
    }

    #[test]
    fn pending_status_is_preserved() {
        let codes = decode_dtc_block("47 01 01 71", DtcStatus::Pending, &SeverityTable::default());
        assert_eq!(codes[0].status, DtcStatus::Pending);
    }
}

//! Diagnostic trouble codes

use serde::{Deserialize, Serialize};

/// Which DTC store a code came out of (modes 03 / 07 / 0A)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtcStatus {
    /// Stored codes, mode 03
    Current,
    /// Pending codes, mode 07
    Pending,
    /// Permanent codes, mode 0A
    Permanent,
}

/// Derived severity classification.
///
/// Not stored by the ECU; assigned at decode time from a data-driven
/// lookup table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtcSeverity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// One decoded trouble code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TroubleCode {
    /// Standard code string ("P0171")
    pub code: String,
    /// Which store the code was read from
    pub status: DtcStatus,
    /// Derived severity
    pub severity: DtcSeverity,
}

impl TroubleCode {
    /// Letter prefix for the top two bits of the first DTC byte
    pub fn system_prefix(high_byte: u8) -> char {
        match (high_byte >> 6) & 0x03 {
            0 => 'P',
            1 => 'C',
            2 => 'B',
            _ => 'U',
        }
    }
}

impl std::fmt::Display for TroubleCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}

//! PID definitions, decoding formulas, and decoded readings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Closed set of numeric decoding formulas over the response data bytes
/// A, B, C, D.
///
/// Reference tables carry formulas as symbolic text ("(A*256+B)/4"); the
/// text maps onto this enum once at load time so the hot decode path is a
/// plain match, never string interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PidFormula {
    /// `A`
    A,
    /// `A*100/255`, rounded to nearest integer (percentages)
    APercent,
    /// `A*10`
    ATimes10,
    /// `(A*256+B)/4` (engine RPM)
    AbQuarter,
    /// `(A*256+B)*0.1-40` (high-resolution temperatures)
    AbTenthMinus40,
    /// `A-40` (temperatures)
    AMinus40,
    /// `A*256+B`
    Ab,
}

impl PidFormula {
    /// Number of data bytes the formula consumes
    pub fn required_bytes(&self) -> usize {
        match self {
            PidFormula::A | PidFormula::APercent | PidFormula::ATimes10 | PidFormula::AMinus40 => 1,
            PidFormula::AbQuarter | PidFormula::AbTenthMinus40 | PidFormula::Ab => 2,
        }
    }

    /// Evaluate the formula over the data bytes (A = `bytes[0]`, ...).
    ///
    /// Callers must have checked `required_bytes` first; short input here
    /// is a programming error, not a wire condition.
    pub fn evaluate(&self, bytes: &[u8]) -> f64 {
        let a = bytes[0] as f64;
        match self {
            PidFormula::A => a,
            PidFormula::APercent => (a * 100.0 / 255.0).round(),
            PidFormula::ATimes10 => a * 10.0,
            PidFormula::AbQuarter => (a * 256.0 + bytes[1] as f64) / 4.0,
            PidFormula::AbTenthMinus40 => (a * 256.0 + bytes[1] as f64) * 0.1 - 40.0,
            PidFormula::AMinus40 => a - 40.0,
            PidFormula::Ab => a * 256.0 + bytes[1] as f64,
        }
    }

    /// The symbolic form used by reference tables
    pub fn symbol(&self) -> &'static str {
        match self {
            PidFormula::A => "A",
            PidFormula::APercent => "A*100/255",
            PidFormula::ATimes10 => "A*10",
            PidFormula::AbQuarter => "(A*256+B)/4",
            PidFormula::AbTenthMinus40 => "(A*256+B)*0.1-40",
            PidFormula::AMinus40 => "A-40",
            PidFormula::Ab => "A*256+B",
        }
    }
}

impl std::str::FromStr for PidFormula {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let collapsed: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match collapsed.as_str() {
            "A" => Ok(PidFormula::A),
            "A*100/255" => Ok(PidFormula::APercent),
            "A*10" => Ok(PidFormula::ATimes10),
            "(A*256+B)/4" => Ok(PidFormula::AbQuarter),
            "(A*256+B)*0.1-40" => Ok(PidFormula::AbTenthMinus40),
            "A-40" => Ok(PidFormula::AMinus40),
            "A*256+B" => Ok(PidFormula::Ab),
            _ => Err(DecodeError::UnsupportedFormula(s.to_string())),
        }
    }
}

impl TryFrom<String> for PidFormula {
    type Error = DecodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PidFormula> for String {
    fn from(f: PidFormula) -> Self {
        f.symbol().to_string()
    }
}

/// One queryable data channel, supplied as immutable reference data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidDefinition {
    /// Service id ("01" current data, "22" manufacturer)
    pub mode: String,
    /// PID code as hex text ("0C")
    pub pid: String,
    /// Decoding formula
    pub formula: PidFormula,
    /// Physical unit of the decoded value
    pub unit: String,
    /// Expected data byte count in the response
    pub byte_length: usize,
    /// Grouping for UI/reference purposes
    pub category: String,
}

impl PidDefinition {
    /// The command string sent on the wire ("010C")
    pub fn command(&self) -> String {
        format!("{}{}", self.mode, self.pid)
    }

    /// Number of echo bytes preceding the data bytes in a response frame:
    /// one service-echo byte plus the PID echo.
    pub fn echo_bytes(&self) -> usize {
        1 + self.pid.len() / 2
    }
}

/// A decoded PID value, produced once per successful decode and handed to
/// collaborators; the engine keeps no history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedReading {
    /// PID that was queried ("010C")
    pub pid: String,
    /// Decoded numeric value
    pub value: f64,
    /// Unit from the definition
    pub unit: String,
    /// The raw frame the value was decoded from
    pub raw_frame: String,
    /// Decode timestamp
    pub captured_at: DateTime<Utc>,
}

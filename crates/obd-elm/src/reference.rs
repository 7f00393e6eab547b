//! Static reference data: the standard PID table, DTC severity
//! classification, and code descriptions.
//!
//! Everything here is immutable lookup data the engine consumes but never
//! mutates. Severity classification is deliberately table-driven so a
//! richer table can replace the built-in one without touching the decoder.

use std::collections::HashMap;

use obd_core::{DtcSeverity, PidDefinition, PidFormula};

/// The built-in PID table: standard mode 01 channels plus a few common
/// manufacturer mode 22 channels.
pub fn standard_pids() -> Vec<PidDefinition> {
    fn def(
        mode: &str,
        pid: &str,
        formula: PidFormula,
        unit: &str,
        byte_length: usize,
        category: &str,
    ) -> PidDefinition {
        PidDefinition {
            mode: mode.into(),
            pid: pid.into(),
            formula,
            unit: unit.into(),
            byte_length,
            category: category.into(),
        }
    }

    vec![
        def("01", "04", PidFormula::APercent, "%", 1, "engine"),
        def("01", "05", PidFormula::AMinus40, "°C", 1, "engine"),
        def("01", "0C", PidFormula::AbQuarter, "rpm", 2, "engine"),
        def("01", "0D", PidFormula::A, "km/h", 1, "standard"),
        def("01", "0F", PidFormula::AMinus40, "°C", 1, "engine"),
        def("01", "11", PidFormula::APercent, "%", 1, "engine"),
        def("01", "1F", PidFormula::Ab, "s", 2, "standard"),
        def("01", "21", PidFormula::Ab, "km", 2, "emission"),
        def("01", "2F", PidFormula::APercent, "%", 1, "fuel"),
        def("01", "33", PidFormula::A, "kPa", 1, "standard"),
        def("01", "3C", PidFormula::AbTenthMinus40, "°C", 2, "emission"),
        // Manufacturer extended channels (mode 22)
        def("22", "2182", PidFormula::ATimes10, "mbar", 1, "turbo"),
        def("22", "2183", PidFormula::APercent, "%", 1, "egr"),
        def("22", "2184", PidFormula::ATimes10, "bar", 1, "fuel"),
    ]
}

/// Look up a definition by mode and PID code.
pub fn find_pid(mode: &str, pid: &str) -> Option<PidDefinition> {
    standard_pids()
        .into_iter()
        .find(|d| d.mode.eq_ignore_ascii_case(mode) && d.pid.eq_ignore_ascii_case(pid))
}

/// Data-driven severity classification for trouble codes.
///
/// Codes absent from the table default to [`DtcSeverity::Low`].
#[derive(Debug, Clone)]
pub struct SeverityTable {
    entries: HashMap<String, DtcSeverity>,
}

impl SeverityTable {
    /// Build a table from explicit entries (replaces the built-in lists).
    pub fn new(entries: impl IntoIterator<Item = (String, DtcSeverity)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn severity_of(&self, code: &str) -> DtcSeverity {
        self.entries.get(code).copied().unwrap_or_default()
    }
}

impl Default for SeverityTable {
    fn default() -> Self {
        // Misfires can destroy a catalyst within minutes; catalyst
        // efficiency and fueling trims damage over longer exposure.
        let critical = ["P0300", "P0301", "P0302", "P0303", "P0304"];
        let high = ["P0420", "P0430", "P0171", "P0172"];
        let medium = ["P0101", "P0441"];

        let mut entries = HashMap::new();
        for code in critical {
            entries.insert(code.to_string(), DtcSeverity::Critical);
        }
        for code in high {
            entries.insert(code.to_string(), DtcSeverity::High);
        }
        for code in medium {
            entries.insert(code.to_string(), DtcSeverity::Medium);
        }
        Self { entries }
    }
}

/// Human-readable description for well-known codes.
pub fn describe(code: &str) -> Option<&'static str> {
    const DESCRIPTIONS: &[(&str, &str)] = &[
        ("P0101", "Mass or volume air flow circuit range/performance"),
        ("P0171", "System too lean (bank 1)"),
        ("P0172", "System too rich (bank 1)"),
        ("P0300", "Random/multiple cylinder misfire detected"),
        ("P0301", "Cylinder 1 misfire detected"),
        ("P0302", "Cylinder 2 misfire detected"),
        ("P0420", "Catalyst system efficiency below threshold (bank 1)"),
        ("P0430", "Catalyst system efficiency below threshold (bank 2)"),
        ("P0441", "Evaporative emission system incorrect purge flow"),
    ];
    DESCRIPTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, d)| *d)
}

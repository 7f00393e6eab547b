//! Remembered adapter devices and compatibility classification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of adapter behind a discovered device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// ELM327-compatible adapter (named like one, or known chipset vendor)
    Elm327,
    /// Generic OBD2 dongle (known OUI prefix or serial-port profile)
    Obd2,
    /// Anything else that exposes a serial channel
    #[default]
    Generic,
}

/// One pattern in the classification table.
///
/// Matching is additive: a device that matches both the name and the
/// address pattern of an entry scores twice its weight, and the highest
/// scoring entry wins.
struct DevicePattern {
    name_contains: &'static [&'static str],
    address_prefixes: &'static [&'static str],
    score: f64,
    kind: DeviceKind,
}

/// Known adapter name fragments and Bluetooth OUI prefixes.
///
/// The OUIs cover the serial modules most commonly found in cheap OBD2
/// dongles (BEKEN, Bolutek, JMicron clones).
const DEVICE_PATTERNS: &[DevicePattern] = &[
    DevicePattern {
        name_contains: &[
            "OBDII", "OBD2", "ELM327", "VGATE", "ICAR", "VIECAR", "KONNWEI", "AUTEL", "LAUNCH",
            "FOXWELL", "TOPDON", "DELPHI",
        ],
        address_prefixes: &[],
        score: 0.9,
        kind: DeviceKind::Elm327,
    },
    DevicePattern {
        name_contains: &[],
        address_prefixes: &["00:0D:18", "00:1D:A5", "98:D3:31", "AC:83:F3"],
        score: 0.7,
        kind: DeviceKind::Obd2,
    },
    DevicePattern {
        name_contains: &["BLUETOOTH"],
        address_prefixes: &[],
        score: 0.3,
        kind: DeviceKind::Generic,
    },
];

impl DeviceKind {
    /// Classify a discovered device from its advertised name and address.
    ///
    /// Returns the kind together with a compatibility score in 0.0..=1.0.
    /// Unrecognized devices fall through to `Generic` with a floor score.
    pub fn classify(name: &str, address: &str) -> (DeviceKind, f64) {
        let name_upper = name.to_uppercase();
        let address_upper = address.to_uppercase();

        let mut best = (DeviceKind::Generic, 0.1);
        for pattern in DEVICE_PATTERNS {
            let mut score = 0.0;
            if pattern
                .name_contains
                .iter()
                .any(|frag| name_upper.contains(frag))
            {
                score += pattern.score;
            }
            if pattern
                .address_prefixes
                .iter()
                .any(|prefix| address_upper.starts_with(prefix))
            {
                score += pattern.score;
            }
            if score > best.1 {
                best = (pattern.kind, score.min(1.0));
            }
        }
        best
    }
}

/// A device the engine has seen or connected to.
///
/// Created on first discovery, updated on every connect attempt outcome,
/// and only removed by an explicit forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable hardware identifier (Bluetooth MAC or host:port for WiFi)
    pub address: String,
    /// Advertised name
    pub name: String,
    /// Adapter kind from classification
    #[serde(default)]
    pub kind: DeviceKind,
    /// Compatibility score in 0.0..=1.0
    #[serde(default)]
    pub compatibility_score: f64,
    /// Whether the host platform reports the device as paired
    #[serde(default)]
    pub is_paired: bool,
    /// When the device last connected successfully
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Vehicle protocol negotiated on the last successful connect (ATDP text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Outcome of the most recent connect attempt
    #[serde(default)]
    pub connection_success: bool,
}

impl DeviceRecord {
    /// Build a record for a freshly discovered device, classifying it
    /// from name and address.
    pub fn discovered(address: impl Into<String>, name: impl Into<String>) -> Self {
        let address = address.into();
        let name = name.into();
        let (kind, compatibility_score) = DeviceKind::classify(&name, &address);
        Self {
            address,
            name,
            kind,
            compatibility_score,
            is_paired: false,
            last_connected_at: None,
            protocol: None,
            connection_success: false,
        }
    }
}

/// Aggregate statistics over the remembered device list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Total remembered devices
    pub total_devices: usize,
    /// Devices whose most recent connect attempt succeeded
    pub successful_devices: usize,
    /// Most recent successful connection time across all devices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connection_at: Option<DateTime<Utc>>,
}

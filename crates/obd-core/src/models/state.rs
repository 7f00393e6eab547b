//! Connection lifecycle state

use serde::Serialize;

use super::device::DeviceRecord;

/// State of the single adapter session.
///
/// Exactly one instance is live process-wide, owned by the lifecycle
/// manager; everything else receives snapshots. A transport handle exists
/// iff the state is `Connecting`, `Connected`, or `Reconnecting`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport, no session
    #[default]
    Disconnected,
    /// Device discovery in progress; `progress` runs 0.0..=1.0 over the
    /// scan budget
    Scanning { progress: f64 },
    /// Platform pairing dialog in flight for a device
    Pairing { device: DeviceRecord },
    /// Transport open + adapter init in progress
    Connecting { device: DeviceRecord, attempt: u32 },
    /// Session established; `protocol` is the ATDP description
    Connected { device: DeviceRecord, protocol: String },
    /// Link dropped, automatic recovery in progress
    Reconnecting {
        device: DeviceRecord,
        attempt: u32,
        max_attempts: u32,
    },
    /// Terminal failure for the last attempt; retry or give up from here
    Failed { device: DeviceRecord, reason: String },
}

impl ConnectionState {
    /// Whether a transport handle may exist in this state
    pub fn owns_transport(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting { .. }
                | ConnectionState::Connected { .. }
                | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// The device this state refers to, if any
    pub fn device(&self) -> Option<&DeviceRecord> {
        match self {
            ConnectionState::Disconnected | ConnectionState::Scanning { .. } => None,
            ConnectionState::Pairing { device }
            | ConnectionState::Connecting { device, .. }
            | ConnectionState::Connected { device, .. }
            | ConnectionState::Reconnecting { device, .. }
            | ConnectionState::Failed { device, .. } => Some(device),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Scanning { progress } => {
                write!(f, "scanning ({:.0}%)", progress * 100.0)
            }
            ConnectionState::Pairing { device } => write!(f, "pairing with {}", device.address),
            ConnectionState::Connecting { device, attempt } => {
                write!(f, "connecting to {} (attempt {})", device.address, attempt)
            }
            ConnectionState::Connected { device, protocol } => {
                write!(f, "connected to {} via {}", device.address, protocol)
            }
            ConnectionState::Reconnecting {
                device,
                attempt,
                max_attempts,
            } => write!(
                f,
                "reconnecting to {} ({}/{})",
                device.address, attempt, max_attempts
            ),
            ConnectionState::Failed { device, reason } => {
                write!(f, "failed for {}: {}", device.address, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_ownership_invariant() {
        let device = DeviceRecord::discovered("AA:BB", "OBDII");
        assert!(!ConnectionState::Disconnected.owns_transport());
        assert!(!ConnectionState::Scanning { progress: 0.5 }.owns_transport());
        assert!(ConnectionState::Connecting {
            device: device.clone(),
            attempt: 1
        }
        .owns_transport());
        assert!(ConnectionState::Connected {
            device: device.clone(),
            protocol: "AUTO".into()
        }
        .owns_transport());
        assert!(ConnectionState::Reconnecting {
            device,
            attempt: 1,
            max_attempts: 3
        }
        .owns_transport());
    }

    #[test]
    fn scanning_serializes_with_progress() {
        let json = serde_json::to_string(&ConnectionState::Scanning { progress: 0.25 }).unwrap();
        assert_eq!(json, r#"{"state":"scanning","progress":0.25}"#);
    }
}

//! Remembered-device list and unattended reconnection
//!
//! Every successful connection is remembered; on the next run the engine
//! can reconnect without a scan by walking the remembered list in ranked
//! order. Persistence failures degrade to in-memory operation rather than
//! failing the connection that triggered the write.

mod store;

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use obd_core::{ConnectionStats, DeviceRecord};
use parking_lot::RwLock;
use tracing::{info, warn};

pub use store::{JsonFileStore, MemoryStore, RecordStore, StoreError};

use crate::config::AutoConnectSettings;
use crate::lifecycle::ConnectionManager;

/// Result of one unattended auto-connect run.
#[derive(Debug, Clone)]
pub struct AutoConnectOutcome {
    pub success: bool,
    /// The device connected to, when successful.
    pub device: Option<DeviceRecord>,
    /// Why the run ended without a connection.
    pub error: Option<String>,
    /// Connect attempts actually made.
    pub attempts: u32,
}

impl AutoConnectOutcome {
    fn connected(device: DeviceRecord, attempts: u32) -> Self {
        Self {
            success: true,
            device: Some(device),
            error: None,
            attempts,
        }
    }

    fn failed(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: false,
            device: None,
            error: Some(error.into()),
            attempts,
        }
    }
}

/// The remembered-device list, cached in memory and written through to a
/// [`RecordStore`].
pub struct DeviceMemory {
    store: Box<dyn RecordStore>,
    records: RwLock<Vec<DeviceRecord>>,
}

impl DeviceMemory {
    /// Load the remembered list from `store`. A corrupt or unreadable
    /// store logs a warning and starts empty; it must not block connecting.
    pub fn new(store: impl RecordStore + 'static) -> Self {
        let records = match store.load() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "device store unreadable, starting empty");
                Vec::new()
            }
        };
        Self {
            store: Box::new(store),
            records: RwLock::new(records),
        }
    }

    /// Record a successful connection to `device`.
    pub fn remember_connected(&self, device: &DeviceRecord, protocol: Option<String>) {
        let mut records = self.records.write();
        let entry = upsert(&mut records, device);
        entry.is_paired = true;
        entry.connection_success = true;
        entry.last_connected_at = Some(Utc::now());
        if protocol.is_some() {
            entry.protocol = protocol;
        }
        self.persist(&records);
    }

    /// Record a failed connection attempt to `device`. The record is kept
    /// (with its history) so ranking can de-prioritize it.
    pub fn record_failure(&self, device: &DeviceRecord) {
        let mut records = self.records.write();
        let entry = upsert(&mut records, device);
        entry.connection_success = false;
        self.persist(&records);
    }

    /// Remembered devices, best candidate first: last attempt succeeded,
    /// then compatibility score, then most recently connected.
    pub fn remembered_devices(&self) -> Vec<DeviceRecord> {
        let mut records = self.records.read().clone();
        records.sort_by(|a, b| {
            b.connection_success
                .cmp(&a.connection_success)
                .then_with(|| {
                    b.compatibility_score
                        .partial_cmp(&a.compatibility_score)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| b.last_connected_at.cmp(&a.last_connected_at))
        });
        records
    }

    /// Drop one device from memory. Forgetting an unknown address is a
    /// no-op, not an error.
    pub fn forget_device(&self, address: &str) {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.address != address);
        if records.len() != before {
            self.persist(&records);
        }
    }

    pub fn forget_all(&self) {
        let mut records = self.records.write();
        records.clear();
        self.persist(&records);
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let records = self.records.read();
        ConnectionStats {
            total_devices: records.len(),
            successful_devices: records.iter().filter(|r| r.connection_success).count(),
            last_connection_at: records
                .iter()
                .filter(|r| r.connection_success)
                .filter_map(|r| r.last_connected_at)
                .max(),
        }
    }

    fn persist(&self, records: &[DeviceRecord]) {
        if let Err(e) = self.store.save(records) {
            warn!(error = %e, "device store write failed, continuing in memory");
        }
    }

    /// Walk the remembered list and connect to the first device that
    /// answers, within the attempt and time budgets of `settings`.
    ///
    /// A connect attempt that overruns its budget is cancelled and the
    /// session torn down, so a half-open transport can never leak into the
    /// next attempt. When every candidate fails and `fallback_to_scan` is
    /// set, one discovery sweep runs so the caller has fresh candidates.
    pub async fn attempt_auto_connect(
        &self,
        settings: &AutoConnectSettings,
        manager: &Arc<ConnectionManager>,
    ) -> AutoConnectOutcome {
        if !settings.enabled {
            return AutoConnectOutcome::failed("auto-connect is disabled", 0);
        }

        let candidates = self.candidate_order(settings);
        if candidates.is_empty() && !settings.fallback_to_scan {
            return AutoConnectOutcome::failed("no remembered devices", 0);
        }

        let mut attempts = 0;
        for device in candidates {
            if attempts >= settings.max_attempts {
                break;
            }
            attempts += 1;
            info!(address = %device.address, attempt = attempts, "auto-connect attempt");
            match tokio::time::timeout(settings.attempt_timeout(), manager.connect(&device)).await
            {
                Ok(Ok(())) => return AutoConnectOutcome::connected(device, attempts),
                Ok(Err(e)) => {
                    warn!(address = %device.address, error = %e, "auto-connect attempt failed");
                }
                Err(_) => {
                    warn!(address = %device.address, "auto-connect attempt overran its budget");
                    let _ = manager.disconnect().await;
                }
            }
        }

        if settings.fallback_to_scan {
            match manager.scan().await {
                Ok(found) => {
                    return AutoConnectOutcome::failed(
                        format!(
                            "no remembered device answered; discovery found {} candidate(s)",
                            found.len()
                        ),
                        attempts,
                    );
                }
                Err(e) => {
                    return AutoConnectOutcome::failed(
                        format!("no remembered device answered and discovery failed: {e}"),
                        attempts,
                    );
                }
            }
        }
        AutoConnectOutcome::failed("no remembered device answered", attempts)
    }

    /// Ranked candidates, with the most recently successful device moved to
    /// the front when `try_last_device` is set.
    fn candidate_order(&self, settings: &AutoConnectSettings) -> Vec<DeviceRecord> {
        let mut ranked = self.remembered_devices();
        if settings.try_last_device {
            let last = ranked
                .iter()
                .filter(|r| r.connection_success && r.last_connected_at.is_some())
                .max_by_key(|r| r.last_connected_at)
                .map(|r| r.address.clone());
            if let Some(address) = last {
                if let Some(pos) = ranked.iter().position(|r| r.address == address) {
                    let device = ranked.remove(pos);
                    ranked.insert(0, device);
                }
            }
        }
        ranked
    }
}

/// Find or insert the record for `device`, refreshing identity fields from
/// the latest sighting.
fn upsert<'a>(records: &'a mut Vec<DeviceRecord>, device: &DeviceRecord) -> &'a mut DeviceRecord {
    if let Some(pos) = records.iter().position(|r| r.address == device.address) {
        let entry = &mut records[pos];
        if !device.name.is_empty() {
            entry.name = device.name.clone();
        }
        entry.kind = device.kind;
        entry.compatibility_score = device.compatibility_score;
        entry
    } else {
        records.push(device.clone());
        records.last_mut().expect("just pushed")
    }
}

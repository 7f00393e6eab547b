//! Persistence backends for the remembered-device list

use std::fs;
use std::path::PathBuf;

use obd_core::DeviceRecord;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("device store contents malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Where the remembered-device list lives between runs.
pub trait RecordStore: Send + Sync {
    fn load(&self) -> Result<Vec<DeviceRecord>, StoreError>;
    fn save(&self, records: &[DeviceRecord]) -> Result<(), StoreError>;
}

/// JSON file on disk, written whole on every change. The list is tiny
/// (a handful of adapters), so rewrite-on-change is fine.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordStore for JsonFileStore {
    fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no device store yet, starting empty");
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, records: &[DeviceRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(records)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// Volatile store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<DeviceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<DeviceRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

impl RecordStore for MemoryStore {
    fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        Ok(self.records.read().clone())
    }

    fn save(&self, records: &[DeviceRecord]) -> Result<(), StoreError> {
        *self.records.write() = records.to_vec();
        Ok(())
    }
}

//! Scripted in-process transport for tests and demos.
//!
//! [`MockTransport`] answers each written command from a response script
//! the way a real ELM327 clone would, including the `>` prompt terminator,
//! and records every write so tests can assert the exact wire traffic.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use obd_core::{DeviceRecord, TransportError};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use super::{DeviceProvider, Transport, TransportEvent};

const EVENT_CAPACITY: usize = 64;

/// One scripted exchange: a command (without `\r`) and the raw reply bytes.
#[derive(Debug, Clone)]
struct ScriptEntry {
    command: String,
    response: String,
}

#[derive(Debug, Default)]
struct Script {
    entries: Vec<ScriptEntry>,
    /// Commands the adapter swallows without answering.
    silenced: HashSet<String>,
}

impl Script {
    fn response_for(&self, command: &str) -> Option<String> {
        if self.silenced.contains(command) {
            return None;
        }
        if let Some(entry) = self.entries.iter().rev().find(|e| e.command == command) {
            return Some(entry.response.clone());
        }
        // Unscripted traffic gets plausible clone behavior so init
        // sequences work without scripting every AT step.
        if command.starts_with("AT") || command.starts_with("at") {
            Some("OK\r\r>".to_string())
        } else {
            Some("NO DATA\r\r>".to_string())
        }
    }
}

/// In-process [`Transport`] that replays a response script.
pub struct MockTransport {
    open: AtomicBool,
    events_tx: broadcast::Sender<TransportEvent>,
    script: RwLock<Script>,
    writes: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            open: AtomicBool::new(true),
            events_tx,
            script: RwLock::new(Script::default()),
            writes: Mutex::new(Vec::new()),
        })
    }

    /// Script a reply for `command`. Later entries for the same command win.
    /// The reply is sent verbatim, so include the terminator (`>` or a
    /// keyword line) the test expects.
    pub fn respond(&self, command: &str, response: &str) {
        self.script.write().entries.push(ScriptEntry {
            command: command.to_string(),
            response: response.to_string(),
        });
    }

    /// Make the adapter swallow `command` without any reply, so callers
    /// run into their timeout/retry path.
    pub fn silence(&self, command: &str) {
        self.script.write().silenced.insert(command.to_string());
    }

    /// Push unsolicited bytes, as a chatty adapter would.
    pub fn inject(&self, bytes: &[u8]) {
        let _ = self
            .events_tx
            .send(TransportEvent::DataReceived(bytes.to_vec()));
    }

    /// Simulate the link going away (out of range, adapter power loss).
    pub fn drop_link(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events_tx.send(TransportEvent::LinkDropped {
            reason: reason.to_string(),
        });
    }

    /// Every command written so far, `\r` stripped, in order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    /// How many times `command` was written. Useful for retry assertions.
    pub fn write_count(&self, command: &str) -> usize {
        self.writes.lock().iter().filter(|w| *w == command).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let command = String::from_utf8_lossy(bytes)
            .trim_end_matches('\r')
            .to_string();
        debug!(%command, "mock write");
        self.writes.lock().push(command.clone());

        if let Some(response) = self.script.read().response_for(&command) {
            let _ = self
                .events_tx
                .send(TransportEvent::DataReceived(response.into_bytes()));
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// [`DeviceProvider`] handing out [`MockTransport`]s.
pub struct MockProvider {
    devices: RwLock<Vec<DeviceRecord>>,
    /// Addresses whose `open` fails outright.
    unreachable: RwLock<HashSet<String>>,
    /// Commands silenced on every transport this provider opens.
    silenced: RwLock<Vec<String>>,
    scripted: RwLock<Vec<(String, String)>>,
    opened: Mutex<Vec<(String, Arc<MockTransport>)>>,
    discovery_cancelled: AtomicBool,
}

impl MockProvider {
    pub fn new(devices: Vec<DeviceRecord>) -> Arc<Self> {
        Arc::new(Self {
            devices: RwLock::new(devices),
            unreachable: RwLock::new(HashSet::new()),
            silenced: RwLock::new(Vec::new()),
            scripted: RwLock::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            discovery_cancelled: AtomicBool::new(false),
        })
    }

    /// Make `open` fail for `address`.
    pub fn set_unreachable(&self, address: &str) {
        self.unreachable.write().insert(address.to_string());
    }

    pub fn set_reachable(&self, address: &str) {
        self.unreachable.write().remove(address);
    }

    /// Script a reply applied to every transport opened after this call.
    pub fn respond(&self, command: &str, response: &str) {
        self.scripted
            .write()
            .push((command.to_string(), response.to_string()));
    }

    pub fn silence(&self, command: &str) {
        self.silenced.write().push(command.to_string());
    }

    /// The transport most recently handed out by `open`.
    pub fn last_opened(&self) -> Option<Arc<MockTransport>> {
        self.opened.lock().last().map(|(_, t)| t.clone())
    }

    /// Addresses opened so far, in order.
    pub fn opened_addresses(&self) -> Vec<String> {
        self.opened.lock().iter().map(|(a, _)| a.clone()).collect()
    }
}

#[async_trait]
impl DeviceProvider for MockProvider {
    async fn open(&self, address: &str) -> Result<Arc<dyn Transport>, TransportError> {
        if self.unreachable.read().contains(address) {
            return Err(TransportError::OpenFailed {
                address: address.to_string(),
                reason: "device unreachable".to_string(),
            });
        }
        let transport = MockTransport::new();
        for (command, response) in self.scripted.read().iter() {
            transport.respond(command, response);
        }
        for command in self.silenced.read().iter() {
            transport.silence(command);
        }
        self.opened
            .lock()
            .push((address.to_string(), transport.clone()));
        Ok(transport)
    }

    async fn list_paired(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        Ok(self
            .devices
            .read()
            .iter()
            .filter(|d| d.is_paired)
            .cloned()
            .collect())
    }

    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceRecord>, TransportError> {
        self.discovery_cancelled.store(false, Ordering::SeqCst);
        // Sweep in small slices so cancellation lands promptly.
        let slice = Duration::from_millis(50);
        let mut elapsed = Duration::ZERO;
        while elapsed < timeout {
            if self.discovery_cancelled.load(Ordering::SeqCst) {
                return Ok(Vec::new());
            }
            tokio::time::sleep(slice.min(timeout - elapsed)).await;
            elapsed += slice;
        }
        Ok(self.devices.read().clone())
    }

    async fn cancel_discovery(&self) {
        self.discovery_cancelled.store(true, Ordering::SeqCst);
    }
}

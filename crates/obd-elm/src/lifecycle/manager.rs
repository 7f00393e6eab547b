//! The single live adapter session and its state machine
//!
//! [`ConnectionManager`] owns the one transport handle in the process,
//! publishes every state transition on a broadcast channel, and recovers
//! dropped links automatically within the configured reconnect budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use obd_core::{
    ConnectionState, DecodedReading, DeviceRecord, EngineError, PidDefinition, TroubleCode,
};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{AdapterInfo, ProtocolEngine};
use crate::memory::DeviceMemory;
use crate::transport::{DeviceProvider, Transport, TransportEvent};

const STATE_CAPACITY: usize = 32;
const SCAN_PROGRESS_TICKS: u32 = 5;

/// The live session: one transport, one engine.
struct Session {
    device: DeviceRecord,
    transport: Arc<dyn Transport>,
    engine: Arc<ProtocolEngine>,
}

impl Drop for Session {
    fn drop(&mut self) {
        // The connect future can be cancelled after init finished but
        // before the caller resumed; the transport must not stay open
        // behind a dropped session. close() is idempotent, so the normal
        // teardown path closing first is fine.
        let transport = self.transport.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = transport.close().await;
            });
        }
    }
}

/// Close-on-drop guard for a transport no session owns yet.
///
/// Cancellation (auto-connect attempt timeouts in particular) can drop the
/// connect future at any await point during initialization; the guard
/// keeps the rule that a transport is either fully open inside a session
/// or fully closed.
struct PendingTransport {
    transport: Arc<dyn Transport>,
    armed: bool,
}

impl PendingTransport {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            armed: true,
        }
    }

    /// Hand the transport over to its new owner; the guard stands down.
    fn release(mut self) -> Arc<dyn Transport> {
        self.armed = false;
        self.transport.clone()
    }
}

impl Drop for PendingTransport {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let transport = self.transport.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = transport.close().await;
            });
        }
    }
}

/// Lifecycle manager for the single adapter session.
///
/// All diagnostic traffic flows through here so the transport-ownership
/// invariant holds: a transport handle exists iff the state is
/// `Connecting`, `Connected`, or `Reconnecting`.
pub struct ConnectionManager {
    provider: Arc<dyn DeviceProvider>,
    memory: Arc<DeviceMemory>,
    config: EngineConfig,
    state: RwLock<ConnectionState>,
    state_tx: broadcast::Sender<ConnectionState>,
    session: tokio::sync::Mutex<Option<Session>>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
    scanning: AtomicBool,
    /// Handle to self for the watcher task; the task must not keep the
    /// manager alive.
    weak: Weak<Self>,
}

impl ConnectionManager {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        memory: Arc<DeviceMemory>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = broadcast::channel(STATE_CAPACITY);
        Arc::new_cyclic(|weak| Self {
            provider,
            memory,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            state_tx,
            session: tokio::sync::Mutex::new(None),
            watcher: parking_lot::Mutex::new(None),
            scanning: AtomicBool::new(false),
            weak: weak.clone(),
        })
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// Subscribe to state transitions. Every transition is published, in
    /// order, to every live subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn device_memory(&self) -> &Arc<DeviceMemory> {
        &self.memory
    }

    fn transition(&self, next: ConnectionState) {
        debug!(state = %next, "lifecycle transition");
        *self.state.write() = next.clone();
        let _ = self.state_tx.send(next);
    }

    /// Connect to `device`: open the transport, run the adapter
    /// initialization sequence, and start watching the link.
    ///
    /// Fails with [`EngineError::AlreadyConnected`] while a session exists;
    /// callers disconnect first to switch devices. A failed initialization
    /// closes the transport before returning, so no half-open session
    /// survives.
    pub async fn connect(&self, device: &DeviceRecord) -> Result<(), EngineError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(EngineError::AlreadyConnected);
        }

        if !device.is_paired {
            // Opening an unpaired device raises the platform pairing flow.
            self.transition(ConnectionState::Pairing {
                device: device.clone(),
            });
        }
        self.transition(ConnectionState::Connecting {
            device: device.clone(),
            attempt: 1,
        });

        match self.open_and_init(device).await {
            Ok(new_session) => {
                let info = new_session.engine.adapter_info();
                let protocol = info
                    .vehicle_protocol
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                let transport = new_session.transport.clone();
                *session = Some(new_session);
                drop(session);

                self.memory
                    .remember_connected(device, info.vehicle_protocol);
                self.spawn_watcher(device.clone(), transport);
                self.transition(ConnectionState::Connected {
                    device: device.clone(),
                    protocol,
                });
                info!(address = %device.address, "session established");
                Ok(())
            }
            Err(e) => {
                drop(session);
                self.memory.record_failure(device);
                self.transition(ConnectionState::Failed {
                    device: device.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Tear down the session. Safe to call in any state; disconnecting
    /// while disconnected is a no-op.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        let mut session = self.session.lock().await;
        let had_session = session.is_some();
        if let Some(old) = session.take() {
            let _ = old.transport.close().await;
        }
        drop(session);

        if had_session || !matches!(self.state(), ConnectionState::Disconnected) {
            self.transition(ConnectionState::Disconnected);
        }
        Ok(())
    }

    /// Discover nearby devices. Runs only from an idle state; the session
    /// transport must not compete with a discovery sweep.
    ///
    /// Progress over the scan budget is published as `Scanning` transitions
    /// while the sweep runs.
    pub async fn scan(&self) -> Result<Vec<DeviceRecord>, EngineError> {
        if self.session.lock().await.is_some() {
            return Err(EngineError::AlreadyConnected);
        }
        self.scanning.store(true, Ordering::SeqCst);
        self.transition(ConnectionState::Scanning { progress: 0.0 });

        let budget = self.config.scan_timeout();
        let started = Instant::now();
        let sweep = self.provider.discover(budget);
        tokio::pin!(sweep);
        let tick = (budget / SCAN_PROGRESS_TICKS).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(started + tick, tick);
        let result = loop {
            tokio::select! {
                result = &mut sweep => break result,
                _ = ticker.tick() => {
                    let progress =
                        (started.elapsed().as_secs_f64() / budget.as_secs_f64()).min(1.0);
                    self.transition(ConnectionState::Scanning { progress });
                }
            }
        };

        self.scanning.store(false, Ordering::SeqCst);
        self.transition(ConnectionState::Disconnected);
        let found = result.map_err(EngineError::Transport)?;
        info!(count = found.len(), "discovery finished");
        Ok(found)
    }

    /// End an in-flight scan early. No-op when no scan is running.
    pub async fn cancel_scan(&self) {
        if self.scanning.load(Ordering::SeqCst) {
            self.provider.cancel_discovery().await;
        }
    }

    /// Devices already paired at the platform level, without a sweep.
    pub async fn paired_devices(&self) -> Result<Vec<DeviceRecord>, EngineError> {
        self.provider
            .list_paired()
            .await
            .map_err(EngineError::Transport)
    }

    /// Raw command passthrough for tooling.
    pub async fn send_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String, EngineError> {
        let engine = self.engine().await?;
        engine
            .send_command(
                command,
                timeout.unwrap_or_else(|| self.config.command_timeout()),
                self.config.max_retries,
            )
            .await
    }

    pub async fn read_pid(&self, def: &PidDefinition) -> Result<DecodedReading, EngineError> {
        self.engine().await?.read_pid(def).await
    }

    /// Read a batch of PIDs; per-channel results, one failure does not
    /// abort the rest.
    pub async fn read_pids(
        &self,
        defs: &[PidDefinition],
    ) -> Vec<Result<DecodedReading, EngineError>> {
        match self.engine().await {
            Ok(engine) => engine.read_pids(defs).await,
            Err(_) => defs.iter().map(|_| Err(EngineError::NotConnected)).collect(),
        }
    }

    pub async fn read_dtcs(&self) -> Result<Vec<TroubleCode>, EngineError> {
        self.engine().await?.read_dtcs().await
    }

    pub async fn clear_dtcs(&self) -> Result<bool, EngineError> {
        self.engine().await?.clear_dtcs().await
    }

    pub async fn adapter_info(&self) -> Result<AdapterInfo, EngineError> {
        Ok(self.engine().await?.adapter_info())
    }

    /// The device of the live session, if any.
    pub async fn connected_device(&self) -> Option<DeviceRecord> {
        self.session.lock().await.as_ref().map(|s| s.device.clone())
    }

    async fn engine(&self) -> Result<Arc<ProtocolEngine>, EngineError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.engine.clone())
            .ok_or(EngineError::NotConnected)
    }

    /// Open the transport and initialize the adapter. The transport is
    /// closed on initialization failure and on cancellation mid-init.
    async fn open_and_init(&self, device: &DeviceRecord) -> Result<Session, EngineError> {
        let pending = PendingTransport::new(self.provider.open(&device.address).await?);
        let engine = Arc::new(ProtocolEngine::new(
            pending.transport.clone(),
            self.config.clone(),
        ));
        match engine.initialize().await {
            Ok(_) => Ok(Session {
                device: device.clone(),
                transport: pending.release(),
                engine,
            }),
            Err(e) => {
                let _ = pending.release().close().await;
                Err(e)
            }
        }
    }

    /// Watch the link for unexpected drops. One watcher task lives for the
    /// whole session, re-subscribing to the replacement transport after
    /// each successful recovery.
    fn spawn_watcher(&self, device: DeviceRecord, transport: Arc<dyn Transport>) {
        let weak = self.weak.clone();
        let handle = tokio::spawn(async move {
            let mut events = transport.events();
            drop(transport);
            loop {
                match events.recv().await {
                    Ok(TransportEvent::LinkDropped { reason }) => {
                        warn!(%reason, "link dropped");
                        let Some(manager) = weak.upgrade() else { break };
                        match manager.recover(&device).await {
                            Some(next_transport) => events = next_transport.events(),
                            None => break,
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    // Sender gone: the session was torn down locally.
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(old) = self.watcher.lock().replace(handle) {
            old.abort();
        }
    }

    /// Reconnect after a link drop, within the configured budget. Returns
    /// the new transport on success so the watcher can follow it.
    async fn recover(&self, device: &DeviceRecord) -> Option<Arc<dyn Transport>> {
        {
            let mut session = self.session.lock().await;
            if let Some(dead) = session.take() {
                let _ = dead.transport.close().await;
            }
        }

        let reconnect = &self.config.reconnect;
        if !reconnect.enabled {
            self.transition(ConnectionState::Disconnected);
            return None;
        }

        for attempt in 1..=reconnect.max_attempts {
            self.transition(ConnectionState::Reconnecting {
                device: device.clone(),
                attempt,
                max_attempts: reconnect.max_attempts,
            });
            tokio::time::sleep(Duration::from_millis(reconnect.delay_ms)).await;

            match self.open_and_init(device).await {
                Ok(new_session) => {
                    let info = new_session.engine.adapter_info();
                    let protocol = info
                        .vehicle_protocol
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string());
                    let transport = new_session.transport.clone();
                    *self.session.lock().await = Some(new_session);

                    self.memory.remember_connected(device, info.vehicle_protocol);
                    self.transition(ConnectionState::Connected {
                        device: device.clone(),
                        protocol,
                    });
                    info!(address = %device.address, attempt, "link recovered");
                    return Some(transport);
                }
                Err(e) => {
                    warn!(address = %device.address, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }

        self.memory.record_failure(device);
        self.transition(ConnectionState::Disconnected);
        None
    }
}

//! Command/response protocol engine
//!
//! Owns the request lifecycle against one open transport: single-flight
//! command execution with bounded retries, the adapter initialization
//! sequence, and the typed read operations (PIDs, trouble codes) built on
//! top of the codecs.

use std::sync::Arc;
use std::time::Duration;

use obd_core::{
    DecodeError, DecodedReading, DtcStatus, EngineError, PidDefinition, TransportError,
    TroubleCode,
};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::frame::{encode, FrameBuffer};
use crate::codec::{dtc, is_negative, pid};
use crate::config::EngineConfig;
use crate::reference::SeverityTable;
use crate::transport::{Transport, TransportEvent};

/// Initialization steps after the reset, in order. Individual failures are
/// tolerated; clones reject some of these and still work.
const INIT_SEQUENCE: &[&str] = &[
    "ATE0", // echo off
    "ATL1", // linefeeds on
    "ATS0", // spaces off
    "ATH1", // headers on
    "ATSP0", // protocol auto
    "ATAT1", // adaptive timing
    "ATST62", // response timeout
    "ATCAF0", // CAN auto-formatting off
];

/// What initialization learned about the adapter and vehicle.
#[derive(Debug, Clone, Default)]
pub struct AdapterInfo {
    /// Version string from ATI, e.g. "v1.5", when the adapter reported one.
    pub elm_version: Option<String>,
    /// Bus protocol from ATDP, e.g. "ISO 15765-4 (CAN 11/500)".
    pub vehicle_protocol: Option<String>,
}

/// The exclusive response-listening seat. Held across one full command
/// exchange so interleaved commands cannot steal each other's frames.
struct CommandSlot {
    events: broadcast::Receiver<TransportEvent>,
    buffer: FrameBuffer,
}

/// Protocol engine over one open [`Transport`].
pub struct ProtocolEngine {
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    slot: tokio::sync::Mutex<CommandSlot>,
    info: parking_lot::RwLock<AdapterInfo>,
    severities: SeverityTable,
}

impl ProtocolEngine {
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let slot = CommandSlot {
            events: transport.events(),
            buffer: FrameBuffer::new(),
        };
        Self {
            transport,
            config,
            slot: tokio::sync::Mutex::new(slot),
            info: parking_lot::RwLock::new(AdapterInfo::default()),
            severities: SeverityTable::default(),
        }
    }

    pub fn adapter_info(&self) -> AdapterInfo {
        self.info.read().clone()
    }

    /// Send one command and wait for its completed response frame.
    ///
    /// The engine is single-flight: if a command is already in progress the
    /// call fails immediately with [`EngineError::Busy`] rather than queue.
    /// An unanswered command is resent verbatim up to `max_retries` times
    /// (`max_retries + 1` writes in total).
    pub async fn send_command(
        &self,
        command: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<String, EngineError> {
        let mut slot = self.slot.try_lock().map_err(|_| EngineError::Busy)?;
        self.run_command(&mut slot, command, timeout, max_retries)
            .await
    }

    async fn run_command(
        &self,
        slot: &mut CommandSlot,
        command: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<String, EngineError> {
        let attempts = max_retries + 1;
        for attempt in 1..=attempts {
            // Stale bytes from a previous exchange must not be read as this
            // command's response.
            slot.buffer.clear();
            self.drain_stale(slot)?;

            self.transport.write(&encode(command)).await?;
            debug!(%command, attempt, "command sent");

            match self.await_frame(slot, timeout).await? {
                Some(frame) => {
                    if frame.contains("UNABLE TO CONNECT") {
                        // The adapter itself answered; retrying cannot help
                        // until the vehicle side changes.
                        return Err(EngineError::UnableToConnect);
                    }
                    return Ok(frame);
                }
                None => warn!(%command, attempt, "no response within budget"),
            }
        }
        Err(EngineError::CommandTimeout {
            command: command.to_string(),
            attempts,
        })
    }

    /// Discard events that arrived before this command was written.
    fn drain_stale(&self, slot: &mut CommandSlot) -> Result<(), EngineError> {
        loop {
            match slot.events.try_recv() {
                Ok(TransportEvent::LinkDropped { reason }) => {
                    warn!(%reason, "link dropped before command");
                    return Err(TransportError::Closed.into());
                }
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(()),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(TransportError::Closed.into())
                }
            }
        }
    }

    /// Wait for one completed frame, or `None` on attempt timeout.
    async fn await_frame(
        &self,
        slot: &mut CommandSlot,
        timeout: Duration,
    ) -> Result<Option<String>, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let event = match tokio::time::timeout(remaining, slot.events.recv()).await {
                Err(_) => return Ok(None),
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(skipped, "event stream lagged");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(TransportError::Closed.into())
                }
                Ok(Ok(event)) => event,
            };
            match event {
                TransportEvent::DataReceived(bytes) => {
                    if let Some(frame) = slot.buffer.feed(&bytes).into_iter().next() {
                        return Ok(Some(frame));
                    }
                }
                TransportEvent::LinkDropped { reason } => {
                    warn!(%reason, "link dropped mid-command");
                    return Err(TransportError::Closed.into());
                }
                TransportEvent::DeviceFound(_) => {}
            }
        }
    }

    /// Run the full adapter initialization sequence.
    ///
    /// The reset (ATZ) is required and gets the long reset budget plus a
    /// settle delay; the configuration steps are tolerated failures. Ends
    /// with a protocol query and a mode 01 liveness probe that must yield
    /// real data, otherwise the adapter is up but the vehicle is not.
    pub async fn initialize(&self) -> Result<AdapterInfo, EngineError> {
        let mut slot = self.slot.try_lock().map_err(|_| EngineError::Busy)?;

        let banner = self
            .run_command(&mut slot, "ATZ", self.config.reset_timeout(), 0)
            .await?;
        info!(%banner, "adapter reset");
        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;

        if let Ok(ident) = self
            .run_command(&mut slot, "ATI", self.config.command_timeout(), 0)
            .await
        {
            self.info.write().elm_version = parse_version(&ident);
        }

        for step in INIT_SEQUENCE {
            match self
                .run_command(&mut slot, step, self.config.command_timeout(), 0)
                .await
            {
                Ok(reply) => debug!(command = step, %reply, "init step ok"),
                Err(EngineError::UnableToConnect) => return Err(EngineError::UnableToConnect),
                Err(e) => warn!(command = step, error = %e, "init step failed, continuing"),
            }
            tokio::time::sleep(Duration::from_millis(self.config.init_step_delay_ms)).await;
        }

        if let Ok(protocol) = self
            .run_command(&mut slot, "ATDP", self.config.command_timeout(), 0)
            .await
        {
            self.info.write().vehicle_protocol = Some(protocol);
        }

        let probe = self
            .run_command(
                &mut slot,
                "0100",
                self.config.command_timeout(),
                self.config.max_retries,
            )
            .await?;
        if is_negative(&probe) {
            return Err(EngineError::VehicleCommunicationFailed);
        }
        info!(protocol = ?self.info.read().vehicle_protocol, "adapter initialized");
        Ok(self.adapter_info())
    }

    /// Quick liveness check for heartbeat use; returns round-trip latency.
    pub async fn probe(&self) -> Result<Duration, EngineError> {
        let started = Instant::now();
        let frame = self
            .send_command("0100", self.config.command_timeout(), 0)
            .await?;
        if is_negative(&frame) {
            return Err(EngineError::VehicleCommunicationFailed);
        }
        Ok(started.elapsed())
    }

    /// Read and decode one PID.
    pub async fn read_pid(&self, def: &PidDefinition) -> Result<DecodedReading, EngineError> {
        let frame = self
            .send_command(
                &def.command(),
                self.config.command_timeout(),
                self.config.max_retries,
            )
            .await?;
        match pid::decode_pid(def, &frame) {
            Ok(reading) => Ok(reading),
            Err(DecodeError::NotSupported) => Err(EngineError::NotSupported(def.command())),
            Err(e) => Err(e.into()),
        }
    }

    /// Read several PIDs sequentially. One failing channel does not abort
    /// the rest; each slot carries its own result.
    pub async fn read_pids(
        &self,
        defs: &[PidDefinition],
    ) -> Vec<Result<DecodedReading, EngineError>> {
        let mut results = Vec::with_capacity(defs.len());
        for def in defs {
            results.push(self.read_pid(def).await);
        }
        results
    }

    /// Read current, pending, and permanent trouble codes.
    ///
    /// Mode 0A predates many adapters; its failure is tolerated and simply
    /// contributes no codes.
    pub async fn read_dtcs(&self) -> Result<Vec<TroubleCode>, EngineError> {
        let mut codes = Vec::new();
        for (service, status, required) in [
            ("03", DtcStatus::Current, true),
            ("07", DtcStatus::Pending, true),
            ("0A", DtcStatus::Permanent, false),
        ] {
            match self
                .send_command(service, self.config.command_timeout(), self.config.max_retries)
                .await
            {
                Ok(frame) => {
                    codes.extend(dtc::decode_dtc_block(&frame, status, &self.severities));
                }
                Err(e) if !required => {
                    debug!(service, error = %e, "optional DTC service unavailable");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(codes)
    }

    /// Clear stored trouble codes (mode 04). Returns whether the adapter
    /// acknowledged the clear.
    pub async fn clear_dtcs(&self) -> Result<bool, EngineError> {
        let frame = self
            .send_command("04", self.config.command_timeout(), self.config.max_retries)
            .await?;
        Ok(!frame.contains("ERROR"))
    }
}

/// Pull a version token ("v1.5") out of an ATI banner.
fn parse_version(banner: &str) -> Option<String> {
    banner
        .split_whitespace()
        .find(|tok| {
            let mut chars = tok.chars();
            matches!(chars.next(), Some('v') | Some('V'))
                && tok.len() > 1
                && chars.all(|c| c.is_ascii_digit() || c == '.')
        })
        .map(|tok| tok.to_string())
}

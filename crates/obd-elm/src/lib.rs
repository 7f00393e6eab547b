//! obd-elm - communication engine for ELM327-compatible OBD2 adapters
//!
//! Drives the line-oriented AT command protocol over a byte transport
//! (Bluetooth serial or WiFi TCP), decodes responses into typed readings
//! and trouble codes, and remembers adapters that worked.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ConnectionManager                        │
//! │  owns the single Transport + ConnectionState                 │
//! │                                                              │
//! │  ┌──────────────┐   ┌───────────────┐   ┌────────────────┐  │
//! │  │ DeviceMemory │   │ state machine │   │ link watcher   │  │
//! │  │ (ranked      │   │ + broadcast   │   │ (reconnect)    │  │
//! │  │  records)    │   │               │   │                │  │
//! │  └──────────────┘   └───────┬───────┘   └────────────────┘  │
//! │                             │                                │
//! │                     ┌───────┴────────┐                       │
//! │                     │ ProtocolEngine │ one command in flight │
//! │                     │ (init, retry)  │                       │
//! │                     └───────┬────────┘                       │
//! │                ┌────────────┴────────────┐                   │
//! │                │ FrameBuffer / codecs    │ pure, no I/O      │
//! │                └────────────┬────────────┘                   │
//! │                     ┌───────┴────────┐                       │
//! │                     │   Transport    │ mock / TCP / BT       │
//! │                     └────────────────┘                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod memory;
pub mod reference;
pub mod transport;

pub use codec::frame::{encode, FrameBuffer};
pub use config::{AutoConnectSettings, EngineConfig, ReconnectConfig};
pub use engine::{AdapterInfo, ProtocolEngine};
pub use lifecycle::ConnectionManager;
pub use memory::{AutoConnectOutcome, DeviceMemory, JsonFileStore, MemoryStore, RecordStore};
pub use transport::{DeviceProvider, Transport, TransportEvent};

// Re-export for convenience
pub use obd_core::{
    ConnectionState, DecodeError, DecodedReading, DeviceKind, DeviceRecord, DtcSeverity,
    DtcStatus, EngineError, PidDefinition, PidFormula, TransportError, TroubleCode,
};

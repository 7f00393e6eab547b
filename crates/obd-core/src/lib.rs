//! obd-core - shared data model for the OBD2 adapter communication engine
//!
//! This crate defines the types that flow between the engine layers:
//! device records, connection state, PID definitions and decoded values,
//! trouble codes, and the error taxonomy. It contains no I/O.

pub mod error;
pub mod models;

pub use error::{DecodeError, EngineError, TransportError};
pub use models::device::{ConnectionStats, DeviceKind, DeviceRecord};
pub use models::dtc::{DtcSeverity, DtcStatus, TroubleCode};
pub use models::pid::{DecodedReading, PidDefinition, PidFormula};
pub use models::state::ConnectionState;

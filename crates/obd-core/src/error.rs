//! Error taxonomy for the adapter engine
//!
//! Every failure type maps to a distinct, actionable user message; the
//! remediation for "adapter not reachable" differs from "ignition likely
//! off", so the two must never collapse into a generic connection error.

use thiserror::Error;

/// Byte-level transport failures
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Radio off or permission denied; not retryable without user action
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// Open or pair failed for a specific device
    #[error("Failed to open {address}: {reason}")]
    OpenFailed { address: String, reason: String },

    /// Write to an open channel failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Channel closed (locally or by the peer)
    #[error("Transport closed")]
    Closed,

    /// Device discovery could not run or was interrupted
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),
}

/// Failures decoding a completed response frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Formula text not in the supported set
    #[error("Unsupported formula: {0}")]
    UnsupportedFormula(String),

    /// Frame carried fewer data bytes than the formula needs
    #[error("Short frame: need {needed} data bytes, got {got}")]
    ShortFrame { needed: usize, got: usize },

    /// ECU answered NO DATA / ERROR: the PID is unavailable on this ECU,
    /// not a transport failure
    #[error("PID not supported by this ECU")]
    NotSupported,

    /// Frame text was not valid hex pairs
    #[error("Invalid hex in frame: {0}")]
    InvalidHex(String),
}

/// Top-level engine failures surfaced to collaborators
#[derive(Debug, Error)]
pub enum EngineError {
    /// Adapter/radio off or permission denied
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Adapter opened but the vehicle did not answer the liveness probe
    #[error("Adapter responded but the vehicle did not")]
    VehicleCommunicationFailed,

    /// No terminator within budget across all attempts
    #[error("Command '{command}' timed out after {attempts} attempts")]
    CommandTimeout { command: String, attempts: u32 },

    /// Adapter reports it cannot reach the vehicle bus
    #[error("Adapter unable to connect to the vehicle")]
    UnableToConnect,

    /// ECU answered NO DATA / ERROR for a specific PID or service
    #[error("{0} not supported by this vehicle")]
    NotSupported(String),

    /// Frame decode failure (short frame, unknown formula, NO DATA)
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A command is already in flight; the engine does not queue
    #[error("Engine busy: a command is already in flight")]
    Busy,

    /// Session-level operation attempted with no active session
    #[error("Not connected to an adapter")]
    NotConnected,

    /// connect() called while a transport is already open
    #[error("Already connected; call disconnect() first")]
    AlreadyConnected,
}

impl EngineError {
    /// Actionable, user-facing remediation text.
    ///
    /// Distinguishes adapter-side from vehicle-side failures because the
    /// fix differs (move closer / re-pair vs. turn the ignition on).
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Transport(TransportError::Unavailable(_)) => {
                "Bluetooth/WiFi is off or permission was denied. Enable the radio and grant \
                 permission, then try again."
                    .to_string()
            }
            EngineError::Transport(TransportError::OpenFailed { .. }) => {
                "Could not reach the adapter. Check that it is plugged into the OBD2 port and \
                 within range, then retry."
                    .to_string()
            }
            EngineError::Transport(_) => {
                "Connection to the adapter was lost. Check the adapter and retry.".to_string()
            }
            EngineError::VehicleCommunicationFailed => {
                "The adapter is working but the vehicle is not answering. Turn the ignition on \
                 and make sure the adapter is fully seated."
                    .to_string()
            }
            EngineError::CommandTimeout { .. } => {
                "The adapter stopped responding. Unplug it for a few seconds and reconnect."
                    .to_string()
            }
            EngineError::UnableToConnect => {
                "The adapter cannot talk to the vehicle bus. Switch the ignition on, then \
                 reconnect to reinitialize the adapter."
                    .to_string()
            }
            EngineError::Decode(DecodeError::NotSupported) | EngineError::NotSupported(_) => {
                "This vehicle does not support the requested parameter.".to_string()
            }
            EngineError::Decode(_) => {
                "The adapter returned a malformed response. Retry the request.".to_string()
            }
            EngineError::Busy => {
                "Another request is still running. Wait for it to finish.".to_string()
            }
            EngineError::NotConnected => {
                "No adapter connected. Connect to an adapter first.".to_string()
            }
            EngineError::AlreadyConnected => {
                "Already connected to an adapter. Disconnect before connecting to another."
                    .to_string()
            }
        }
    }

    /// Whether retrying the same operation without user action can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::CommandTimeout { .. } | EngineError::Busy
        )
    }
}

//! Integration tests for the OBD2 adapter engine
//!
//! These tests drive the full stack through [`obd_elm::ConnectionManager`]
//! against the scripted mock transport:
//! - connection lifecycle and initialization wire traffic
//! - live diagnostics (PIDs, trouble codes) over an established session
//! - link-drop recovery and the reconnect budget
//! - remembered devices and unattended auto-connect
//!
//! Everything runs on a paused tokio clock, so timeout and retry paths
//! execute instantly and deterministically.
//!
//! # Test Structure
//!
//! - `session_e2e_test.rs` - lifecycle, engine traffic, reconnect
//! - `auto_connect_test.rs` - device memory, ranking, auto-connect

/// Install a `RUST_LOG`-filtered subscriber for test output. Safe to call
/// from every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

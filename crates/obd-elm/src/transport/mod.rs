//! Byte transports underneath the protocol engine
//!
//! The engine is transport-agnostic: Bluetooth RFCOMM, a WiFi TCP socket,
//! and the in-process mock all push the same typed events onto a channel
//! the engine and lifecycle manager drain. Platform Bluetooth internals
//! stay behind [`DeviceProvider`]; this crate ships the TCP and mock
//! implementations.

mod adapter;
pub mod mock;
pub mod tcp;

pub use adapter::{DeviceProvider, Transport, TransportEvent};
pub use obd_core::TransportError;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use obd_core::{DeviceRecord, TransportError};
use tokio::sync::broadcast;

/// Events pushed by a transport onto its broadcast channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A candidate device surfaced during discovery.
    DeviceFound(DeviceRecord),
    /// Raw bytes arrived from the adapter. Chunk boundaries are arbitrary;
    /// the frame buffer reassembles them.
    DataReceived(Vec<u8>),
    /// The link went away without a local close.
    LinkDropped { reason: String },
}

/// An open byte link to one adapter.
///
/// Implementations own their read side and publish inbound bytes as
/// [`TransportEvent::DataReceived`]; callers never poll for reads.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write raw bytes to the adapter.
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to this link's event stream. Every subscriber sees every
    /// event from the moment of subscription.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Close the link. Closing an already-closed link is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

/// Source of devices and links for one physical medium.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Open a link to the device at `address`. For media with a pairing
    /// step, pairing happens here.
    async fn open(&self, address: &str) -> Result<Arc<dyn Transport>, TransportError>;

    /// Devices already paired/configured at the platform level.
    async fn list_paired(&self) -> Result<Vec<DeviceRecord>, TransportError>;

    /// Actively discover nearby devices, returning what was found within
    /// `timeout`. A concurrent [`cancel_discovery`](Self::cancel_discovery)
    /// ends the sweep early with whatever has been collected.
    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceRecord>, TransportError>;

    /// Stop an in-flight discovery sweep. No-op when none is running.
    async fn cancel_discovery(&self);
}

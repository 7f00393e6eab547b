//! TCP transport for WiFi adapters.
//!
//! WiFi ELM327 clones expose a raw TCP socket (conventionally port 35000).
//! A background reader task pumps inbound bytes onto the event channel and
//! reports EOF or read errors as [`TransportEvent::LinkDropped`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use obd_core::{DeviceRecord, TransportError};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{DeviceProvider, Transport, TransportEvent};

const EVENT_CAPACITY: usize = 64;
const READ_CHUNK: usize = 512;

pub struct TcpTransport {
    open: Arc<AtomicBool>,
    events_tx: broadcast::Sender<TransportEvent>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Connect to `address` (`host:port`), failing after `timeout`.
    pub async fn connect(address: &str, timeout: Duration) -> Result<Arc<Self>, TransportError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::OpenFailed {
                address: address.to_string(),
                reason: "connect timed out".to_string(),
            })?
            .map_err(|e| TransportError::OpenFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(Self::pump(read_half, events_tx.clone(), open.clone()));
        let transport = Arc::new(Self {
            open,
            events_tx,
            writer: Mutex::new(Some(write_half)),
            reader: parking_lot::Mutex::new(Some(handle)),
        });
        debug!(%address, "tcp transport open");
        Ok(transport)
    }

    async fn pump(
        mut read_half: tokio::net::tcp::OwnedReadHalf,
        events_tx: broadcast::Sender<TransportEvent>,
        open: Arc<AtomicBool>,
    ) {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => {
                    if open.swap(false, Ordering::SeqCst) {
                        let _ = events_tx.send(TransportEvent::LinkDropped {
                            reason: "peer closed connection".to_string(),
                        });
                    }
                    break;
                }
                Ok(n) => {
                    let _ = events_tx.send(TransportEvent::DataReceived(buf[..n].to_vec()));
                }
                Err(e) => {
                    if open.swap(false, Ordering::SeqCst) {
                        warn!(error = %e, "tcp read failed");
                        let _ = events_tx.send(TransportEvent::LinkDropped {
                            reason: e.to_string(),
                        });
                    }
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Ordered so the reader sees a local close, not a link drop.
        self.open.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Provider over a configured list of `host:port` candidates.
///
/// WiFi adapters have no platform pairing registry, so the candidate list
/// doubles as the paired set; discovery probes each candidate for
/// reachability.
pub struct TcpProvider {
    candidates: RwLock<Vec<String>>,
    open_timeout: Duration,
    cancel: AtomicBool,
}

impl TcpProvider {
    pub fn new(candidates: Vec<String>, open_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            candidates: RwLock::new(candidates),
            open_timeout,
            cancel: AtomicBool::new(false),
        })
    }

    fn record_for(address: &str) -> DeviceRecord {
        let mut record = DeviceRecord::discovered(address, format!("OBD2 WiFi {address}"));
        record.is_paired = true;
        record
    }
}

#[async_trait]
impl DeviceProvider for TcpProvider {
    async fn open(&self, address: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = TcpTransport::connect(address, self.open_timeout).await?;
        Ok(transport)
    }

    async fn list_paired(&self) -> Result<Vec<DeviceRecord>, TransportError> {
        Ok(self
            .candidates
            .read()
            .iter()
            .map(|a| Self::record_for(a))
            .collect())
    }

    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceRecord>, TransportError> {
        self.cancel.store(false, Ordering::SeqCst);
        let candidates = self.candidates.read().clone();
        let per_probe = self.open_timeout.min(timeout);
        let mut found = Vec::new();
        for address in candidates {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }
            match TcpTransport::connect(&address, per_probe).await {
                Ok(transport) => {
                    let _ = transport.close().await;
                    found.push(Self::record_for(&address));
                }
                Err(e) => debug!(%address, error = %e, "candidate not reachable"),
            }
        }
        Ok(found)
    }

    async fn cancel_discovery(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn round_trip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ATZ\r");
            socket.write_all(b"ELM327 v1.5\r\r>").await.unwrap();
        });

        let transport = TcpTransport::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        let mut rx = transport.events();
        transport.write(b"ATZ\r").await.unwrap();

        match rx.recv().await.unwrap() {
            TransportEvent::DataReceived(bytes) => {
                assert!(String::from_utf8(bytes).unwrap().contains("ELM327"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        server.await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn provider_discovers_reachable_candidates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Port 1 is never listening, so only the live candidate survives.
        let provider = TcpProvider::new(
            vec![addr.clone(), "127.0.0.1:1".to_string()],
            Duration::from_millis(200),
        );
        let found = provider.discover(Duration::from_secs(2)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, addr);

        let paired = provider.list_paired().await.unwrap();
        assert_eq!(paired.len(), 2);
        assert!(paired.iter().all(|d| d.is_paired));
    }

    #[tokio::test]
    async fn peer_close_surfaces_as_link_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let transport = TcpTransport::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        let mut rx = transport.events();

        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);

        match rx.recv().await.unwrap() {
            TransportEvent::LinkDropped { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!transport.is_open());
    }
}

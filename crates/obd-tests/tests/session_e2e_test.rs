//! End-to-end session tests: connect, talk, drop the link, recover
//!
//! Run with: cargo test --test session_e2e_test

use std::sync::Arc;
use std::time::Duration;

use obd_elm::config::ReconnectConfig;
use obd_elm::memory::MemoryStore;
use obd_elm::reference::find_pid;
use obd_elm::transport::mock::MockProvider;
use obd_elm::{
    ConnectionManager, ConnectionState, DeviceMemory, DeviceRecord, DtcStatus, EngineConfig,
    EngineError,
};
use pretty_assertions::assert_eq;

fn fast_config() -> EngineConfig {
    EngineConfig {
        command_timeout_ms: 200,
        reset_timeout_ms: 300,
        settle_delay_ms: 1,
        init_step_delay_ms: 1,
        max_retries: 1,
        scan_timeout_ms: 100,
        reconnect: ReconnectConfig {
            enabled: true,
            max_attempts: 2,
            delay_ms: 10,
        },
    }
}

fn adapter_device() -> DeviceRecord {
    let mut device = DeviceRecord::discovered("98:D3:31:12:34:56", "OBDII ELM327 v1.5");
    device.is_paired = true;
    device
}

/// A provider whose adapter answers the full init sequence and a few
/// diagnostic services.
fn working_provider() -> Arc<MockProvider> {
    let provider = MockProvider::new(vec![adapter_device()]);
    provider.respond("ATZ", "ELM327 v1.5\r\r>");
    provider.respond("ATI", "ELM327 v1.5\r\r>");
    provider.respond("ATDP", "AUTO, ISO 15765-4 (CAN 11/500)\r\r>");
    provider.respond("0100", "41 00 BE 3E B8 11\r\r>");
    provider.respond("010C", "41 0C 1A F8\r\r>");
    provider.respond("0105", "41 05 5F\r\r>");
    provider.respond("03", "43 02 01 71 04 20\r\r>");
    provider.respond("07", "NO DATA\r\r>");
    provider.respond("0A", "NO DATA\r\r>");
    provider.respond("04", "44\r\r>");
    provider
}

fn manager_over(provider: Arc<MockProvider>) -> Arc<ConnectionManager> {
    obd_tests::init_tracing();
    ConnectionManager::new(
        provider,
        Arc::new(DeviceMemory::new(MemoryStore::new())),
        fast_config(),
    )
}

#[tokio::test(start_paused = true)]
async fn connect_sends_the_documented_init_sequence() {
    let provider = working_provider();
    let manager = manager_over(provider.clone());

    manager.connect(&adapter_device()).await.unwrap();

    let writes = provider.last_opened().unwrap().writes();
    let expected = [
        "ATZ", "ATI", "ATE0", "ATL1", "ATS0", "ATH1", "ATSP0", "ATAT1", "ATST62", "ATCAF0",
        "ATDP", "0100",
    ];
    assert_eq!(writes, expected);

    match manager.state() {
        ConnectionState::Connected { protocol, .. } => assert!(protocol.contains("15765")),
        other => panic!("expected connected, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn full_diagnostic_session_over_one_connection() {
    let provider = working_provider();
    let manager = manager_over(provider.clone());
    manager.connect(&adapter_device()).await.unwrap();

    // Typed PID reads
    let rpm = manager.read_pid(&find_pid("01", "0C").unwrap()).await.unwrap();
    assert_eq!(rpm.value, 1726.0);
    let coolant = manager.read_pid(&find_pid("01", "05").unwrap()).await.unwrap();
    assert_eq!(coolant.value, 55.0);

    // Trouble codes across the three services; empty pending/permanent
    // blocks contribute nothing.
    let codes = manager.read_dtcs().await.unwrap();
    let rendered: Vec<_> = codes.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(rendered, vec!["P0171", "P0420"]);
    assert!(codes.iter().all(|c| c.status == DtcStatus::Current));

    assert!(manager.clear_dtcs().await.unwrap());

    manager.disconnect().await.unwrap();
    assert!(matches!(manager.state(), ConnectionState::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn batch_read_isolates_per_pid_failures() {
    let provider = working_provider();
    provider.respond("012F", "NO DATA\r\r>");
    let manager = manager_over(provider.clone());
    manager.connect(&adapter_device()).await.unwrap();

    let defs = [
        find_pid("01", "0C").unwrap(),
        find_pid("01", "2F").unwrap(),
        find_pid("01", "05").unwrap(),
    ];
    let results = manager.read_pids(&defs).await;

    assert_eq!(results[0].as_ref().unwrap().value, 1726.0);
    assert!(matches!(results[1], Err(EngineError::NotSupported(_))));
    assert_eq!(results[2].as_ref().unwrap().value, 55.0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_command_retries_identically_then_times_out() {
    let provider = working_provider();
    provider.silence("0133");
    let manager = manager_over(provider.clone());
    manager.connect(&adapter_device()).await.unwrap();

    let err = manager.send_command("0133", None).await.unwrap_err();
    assert!(matches!(err, EngineError::CommandTimeout { attempts: 2, .. }));
    // max_retries = 1, so exactly two identical writes.
    assert_eq!(provider.last_opened().unwrap().write_count("0133"), 2);
}

#[tokio::test(start_paused = true)]
async fn link_drop_recovers_and_session_keeps_working() {
    let provider = working_provider();
    let manager = manager_over(provider.clone());
    let mut states = manager.subscribe();
    manager.connect(&adapter_device()).await.unwrap();

    provider.last_opened().unwrap().drop_link("out of range");

    let mut saw_reconnecting = false;
    loop {
        match states.recv().await.unwrap() {
            ConnectionState::Reconnecting { .. } => saw_reconnecting = true,
            ConnectionState::Connected { .. } if saw_reconnecting => break,
            _ => {}
        }
    }

    // Two transports were opened in total and the new one carries traffic.
    assert_eq!(provider.opened_addresses().len(), 2);
    let rpm = manager.read_pid(&find_pid("01", "0C").unwrap()).await.unwrap();
    assert_eq!(rpm.value, 1726.0);
}

#[tokio::test(start_paused = true)]
async fn reconnect_budget_exhaustion_records_the_failure() {
    let provider = working_provider();
    let manager = manager_over(provider.clone());
    let mut states = manager.subscribe();
    manager.connect(&adapter_device()).await.unwrap();

    provider.set_unreachable("98:D3:31:12:34:56");
    provider.last_opened().unwrap().drop_link("adapter unplugged");

    let mut attempts = 0;
    loop {
        match states.recv().await.unwrap() {
            ConnectionState::Reconnecting { max_attempts, .. } => {
                attempts += 1;
                assert_eq!(max_attempts, 2);
            }
            ConnectionState::Disconnected => break,
            _ => {}
        }
    }
    assert_eq!(attempts, 2);

    // The memory now ranks this device as a failed candidate.
    let remembered = manager.device_memory().remembered_devices();
    assert!(!remembered[0].connection_success);

    let err = manager.send_command("010C", None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn vehicle_off_fails_init_with_actionable_message() {
    let provider = MockProvider::new(vec![adapter_device()]);
    provider.respond("ATZ", "ELM327 v1.5\r\r>");
    provider.respond("0100", "UNABLE TO CONNECT\r\r>");
    let manager = manager_over(provider);

    let err = manager.connect(&adapter_device()).await.unwrap_err();
    assert!(matches!(err, EngineError::UnableToConnect));
    assert!(err.user_message().contains("ignition"));
    assert!(matches!(manager.state(), ConnectionState::Failed { .. }));
}

#[tokio::test(start_paused = true)]
async fn scan_transitions_and_returns_candidates() {
    let provider = working_provider();
    let manager = manager_over(provider);
    let mut states = manager.subscribe();

    let found = manager.scan().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address, "98:D3:31:12:34:56");

    let mut seen = Vec::new();
    while let Ok(state) = states.try_recv() {
        seen.push(state);
    }
    assert!(matches!(
        seen.first(),
        Some(ConnectionState::Scanning { progress }) if *progress == 0.0
    ));
    // Progress is reported while the sweep runs, then the state goes idle.
    assert!(seen
        .iter()
        .any(|s| matches!(s, ConnectionState::Scanning { progress } if *progress > 0.0)));
    assert!(matches!(seen.last(), Some(ConnectionState::Disconnected)));
}

#[tokio::test(start_paused = true)]
async fn cancelled_scan_ends_early() {
    let provider = working_provider();
    let manager = manager_over(provider);

    let scan = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.scan().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.cancel_scan().await;

    let found = scan.await.unwrap().unwrap();
    assert!(found.is_empty());
}

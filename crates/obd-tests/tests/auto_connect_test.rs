//! Device memory and unattended auto-connect
//!
//! Run with: cargo test --test auto_connect_test

use std::sync::Arc;

use chrono::Utc;
use obd_elm::config::ReconnectConfig;
use obd_elm::memory::{JsonFileStore, MemoryStore};
use obd_elm::transport::mock::MockProvider;
use obd_elm::Transport;
use obd_elm::{
    AutoConnectSettings, ConnectionManager, DeviceMemory, DeviceRecord, EngineConfig,
};
use pretty_assertions::assert_eq;

fn fast_config() -> EngineConfig {
    EngineConfig {
        command_timeout_ms: 200,
        reset_timeout_ms: 300,
        settle_delay_ms: 1,
        init_step_delay_ms: 1,
        max_retries: 0,
        scan_timeout_ms: 100,
        reconnect: ReconnectConfig {
            enabled: false,
            max_attempts: 0,
            delay_ms: 0,
        },
    }
}

fn device(address: &str, name: &str) -> DeviceRecord {
    let mut device = DeviceRecord::discovered(address, name);
    device.is_paired = true;
    device
}

fn working_provider(devices: Vec<DeviceRecord>) -> Arc<MockProvider> {
    obd_tests::init_tracing();
    let provider = MockProvider::new(devices);
    provider.respond("ATZ", "ELM327 v1.5\r\r>");
    provider.respond("ATDP", "AUTO, ISO 15765-4 (CAN 11/500)\r\r>");
    provider.respond("0100", "41 00 BE 3E B8 11\r\r>");
    provider
}

fn settings() -> AutoConnectSettings {
    AutoConnectSettings {
        enabled: true,
        max_attempts: 3,
        timeout_ms: 5000,
        try_last_device: true,
        fallback_to_scan: false,
    }
}

#[tokio::test(start_paused = true)]
async fn auto_connect_tries_most_recent_success_first() {
    let strong = device("AA:00:00:00:00:01", "OBDII ELM327");
    let recent = device("AA:00:00:00:00:02", "BLUETOOTH dongle");

    let memory = Arc::new(DeviceMemory::new(MemoryStore::new()));
    memory.remember_connected(&strong, None);
    memory.remember_connected(&recent, None);

    let provider = working_provider(vec![strong, recent]);
    let manager = ConnectionManager::new(provider.clone(), memory.clone(), fast_config());

    let outcome = memory.attempt_auto_connect(&settings(), &manager).await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 1);
    // The lower-ranked but more recently successful device wins the first
    // attempt.
    assert_eq!(
        outcome.device.unwrap().address,
        "AA:00:00:00:00:02"
    );
    assert_eq!(provider.opened_addresses(), vec!["AA:00:00:00:00:02"]);
}

#[tokio::test(start_paused = true)]
async fn auto_connect_falls_through_unreachable_devices() {
    let first = device("AA:00:00:00:00:01", "OBDII ELM327");
    let second = device("AA:00:00:00:00:02", "Vgate iCar Pro");

    let memory = Arc::new(DeviceMemory::new(MemoryStore::new()));
    memory.remember_connected(&second, None);
    memory.remember_connected(&first, None);

    let provider = working_provider(vec![first, second]);
    provider.set_unreachable("AA:00:00:00:00:01");
    let manager = ConnectionManager::new(provider.clone(), memory.clone(), fast_config());

    let outcome = memory.attempt_auto_connect(&settings(), &manager).await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.device.unwrap().address, "AA:00:00:00:00:02");
}

#[tokio::test(start_paused = true)]
async fn auto_connect_respects_the_attempt_budget() {
    let memory = Arc::new(DeviceMemory::new(MemoryStore::new()));
    let mut devices = Vec::new();
    for i in 1..=5 {
        let d = device(&format!("AA:00:00:00:00:0{i}"), "OBDII");
        memory.remember_connected(&d, None);
        devices.push(d);
    }

    let provider = working_provider(devices.clone());
    for d in &devices {
        provider.set_unreachable(&d.address);
    }
    let manager = ConnectionManager::new(provider.clone(), memory.clone(), fast_config());

    let outcome = memory.attempt_auto_connect(&settings(), &manager).await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn overrun_attempt_leaves_the_transport_closed() {
    let slow = device("AA:00:00:00:00:01", "OBDII ELM327");

    let memory = Arc::new(DeviceMemory::new(MemoryStore::new()));
    memory.remember_connected(&slow, None);

    let provider = working_provider(vec![slow]);
    // The adapter never answers ATZ, so init outlives the per-attempt
    // deadline and the connect future is cancelled mid-flight.
    provider.silence("ATZ");
    let manager = ConnectionManager::new(provider.clone(), memory.clone(), fast_config());

    let outcome = memory
        .attempt_auto_connect(
            &AutoConnectSettings {
                max_attempts: 1,
                timeout_ms: 50,
                ..settings()
            },
            &manager,
        )
        .await;

    assert!(!outcome.success);
    // Let the teardown task run, then check nothing leaked half-open.
    tokio::task::yield_now().await;
    assert!(!provider.last_opened().unwrap().is_open());
    assert!(manager.connected_device().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn auto_connect_disabled_does_nothing() {
    let memory = Arc::new(DeviceMemory::new(MemoryStore::new()));
    memory.remember_connected(&device("AA:00:00:00:00:01", "OBDII"), None);

    let provider = working_provider(vec![device("AA:00:00:00:00:01", "OBDII")]);
    let manager = ConnectionManager::new(provider.clone(), memory.clone(), fast_config());

    let outcome = memory
        .attempt_auto_connect(
            &AutoConnectSettings {
                enabled: false,
                ..settings()
            },
            &manager,
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 0);
    assert!(provider.opened_addresses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn auto_connect_falls_back_to_scan_when_all_fail() {
    let remembered = device("AA:00:00:00:00:01", "OBDII");
    let nearby = device("BB:00:00:00:00:01", "Vgate iCar Pro");

    let memory = Arc::new(DeviceMemory::new(MemoryStore::new()));
    memory.remember_connected(&remembered, None);

    let provider = working_provider(vec![nearby]);
    provider.set_unreachable("AA:00:00:00:00:01");
    let manager = ConnectionManager::new(provider.clone(), memory.clone(), fast_config());

    let outcome = memory
        .attempt_auto_connect(
            &AutoConnectSettings {
                fallback_to_scan: true,
                ..settings()
            },
            &manager,
        )
        .await;

    assert!(!outcome.success);
    // The fallback sweep ran and found the fresh candidate.
    assert!(outcome.error.unwrap().contains("1 candidate"));
}

#[tokio::test(start_paused = true)]
async fn remembered_list_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");

    {
        let memory = Arc::new(DeviceMemory::new(JsonFileStore::new(path.clone())));
        let provider = working_provider(vec![device("AA:00:00:00:00:01", "OBDII ELM327")]);
        let manager = ConnectionManager::new(provider, memory.clone(), fast_config());
        manager
            .connect(&device("AA:00:00:00:00:01", "OBDII ELM327"))
            .await
            .unwrap();
        manager.disconnect().await.unwrap();
    }

    // The on-disk format is plain JSON.
    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed[0]["address"], "AA:00:00:00:00:01");

    let reopened = DeviceMemory::new(JsonFileStore::new(path));
    let records = reopened.remembered_devices();
    assert_eq!(records.len(), 1);
    assert!(records[0].connection_success);
    assert!(records[0].last_connected_at.unwrap() <= Utc::now());
}

#[tokio::test(start_paused = true)]
async fn stats_reflect_history_across_devices() {
    let memory = Arc::new(DeviceMemory::new(MemoryStore::new()));
    memory.remember_connected(&device("AA:00:00:00:00:01", "OBDII"), None);
    memory.record_failure(&device("AA:00:00:00:00:02", "OBDII"));
    memory.forget_device("not-remembered");

    let stats = memory.connection_stats();
    assert_eq!(stats.total_devices, 2);
    assert_eq!(stats.successful_devices, 1);
    assert!(stats.last_connection_at.is_some());
}

//! Engine configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the protocol engine and lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-command response budget
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// ATZ needs far longer than a normal command while the adapter reboots
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,
    /// Settle delay after ATZ before the next command
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Pause between initialization steps
    #[serde(default = "default_init_step_delay")]
    pub init_step_delay_ms: u64,
    /// Resends of an unanswered command before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Device discovery budget
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_ms: u64,
    /// Automatic recovery after an unexpected link drop
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout(),
            reset_timeout_ms: default_reset_timeout(),
            settle_delay_ms: default_settle_delay(),
            init_step_delay_ms: default_init_step_delay(),
            max_retries: default_max_retries(),
            scan_timeout_ms: default_scan_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

fn default_command_timeout() -> u64 {
    5000
}

fn default_reset_timeout() -> u64 {
    3000
}

fn default_settle_delay() -> u64 {
    1000
}

fn default_init_step_delay() -> u64 {
    200
}

fn default_max_retries() -> u32 {
    2
}

fn default_scan_timeout() -> u64 {
    10000
}

/// Reconnection policy after an unexpected link drop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_reconnect_delay")]
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_attempts: default_reconnect_attempts(),
            delay_ms: default_reconnect_delay(),
        }
    }
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay() -> u64 {
    1000
}

/// Policy for unattended reconnection to remembered devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoConnectSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Total connect attempts across the whole remembered list
    #[serde(default = "default_auto_attempts")]
    pub max_attempts: u32,
    /// Budget per individual attempt
    #[serde(default = "default_auto_timeout")]
    pub timeout_ms: u64,
    /// Try the most-recently-successful device before the ranked order
    #[serde(default = "default_true")]
    pub try_last_device: bool,
    /// Run a fresh discovery scan when every remembered device fails
    #[serde(default = "default_true")]
    pub fallback_to_scan: bool,
}

impl Default for AutoConnectSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_attempts: default_auto_attempts(),
            timeout_ms: default_auto_timeout(),
            try_last_device: default_true(),
            fallback_to_scan: default_true(),
        }
    }
}

impl AutoConnectSettings {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_auto_attempts() -> u32 {
    3
}

fn default_auto_timeout() -> u64 {
    30000
}

//! Configuration data types for the dashboard core.
//!
//! Every table and every key is optional; omitted values fall back to the
//! reference behaviour of the simulated fleet.

use core::time::Duration;

use serde::Deserialize;

/// HTTP server binding configuration section.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP port for the websocket/API service.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address for the HTTP listener.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// Timing and randomness of the simulated telemetry source.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Delay between `connect` and the `connected` notification.
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    /// Interval between per-device snapshots.
    #[serde(default = "default_device_interval_ms")]
    pub device_interval_ms: u64,
    /// Interval between system analytics snapshots.
    #[serde(default = "default_analytics_interval_ms")]
    pub analytics_interval_ms: u64,
    /// Interval between alert rolls.
    #[serde(default = "default_alert_interval_ms")]
    pub alert_interval_ms: u64,
    /// Probability that a generated snapshot reports the device Online.
    #[serde(default = "default_online_probability")]
    pub online_probability: f64,
    /// Probability that an alert tick produces an alert.
    #[serde(default = "default_alert_probability")]
    pub alert_probability: f64,
    /// Device ids the source picks from.
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: default_connect_delay_ms(),
            device_interval_ms: default_device_interval_ms(),
            analytics_interval_ms: default_analytics_interval_ms(),
            alert_interval_ms: default_alert_interval_ms(),
            online_probability: default_online_probability(),
            alert_probability: default_alert_probability(),
            devices: default_devices(),
        }
    }
}

impl TelemetryConfig {
    #[must_use]
    pub const fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    #[must_use]
    pub const fn device_interval(&self) -> Duration {
        Duration::from_millis(self.device_interval_ms)
    }

    #[must_use]
    pub const fn analytics_interval(&self) -> Duration {
        Duration::from_millis(self.analytics_interval_ms)
    }

    #[must_use]
    pub const fn alert_interval(&self) -> Duration {
        Duration::from_millis(self.alert_interval_ms)
    }
}

/// How the device store treats a snapshot that is not newer than the stored one.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Every merged snapshot replaces the stored one, regardless of its timestamp.
    #[default]
    LastWriteWins,
    /// Snapshots older than or as old as the stored one are ignored.
    RejectStale,
}

/// Settings for each subscriber-side device store.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum number of devices returned by `snapshot_view`.
    #[serde(default = "default_display_limit")]
    pub display_limit: usize,
    #[serde(default)]
    pub ordering: OrderingPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            display_limit: default_display_limit(),
            ordering: OrderingPolicy::default(),
        }
    }
}

/// Settings for the in-process mock fleet standing in for the device API.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct FleetConfig {
    /// Artificial latency of a mock command round trip.
    #[serde(default = "default_command_latency_ms")]
    pub command_latency_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            command_latency_ms: default_command_latency_ms(),
        }
    }
}

impl FleetConfig {
    #[must_use]
    pub const fn command_latency(&self) -> Duration {
        Duration::from_millis(self.command_latency_ms)
    }
}

/// Root config structure.
///
/// ```toml
/// [server]
/// port = 8080
///
/// [telemetry]
/// device_interval_ms = 1000
///
/// [store]
/// ordering = "reject_stale"
/// ```
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct DashboardConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
}

const fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

const fn default_connect_delay_ms() -> u64 {
    100
}

const fn default_device_interval_ms() -> u64 {
    2000
}

const fn default_analytics_interval_ms() -> u64 {
    5000
}

const fn default_alert_interval_ms() -> u64 {
    15_000
}

const fn default_online_probability() -> f64 {
    0.9
}

const fn default_alert_probability() -> f64 {
    0.3
}

/// `dev-001` through `dev-015`, matching the reference fleet.
fn default_devices() -> Vec<String> {
    (1..=15).map(|n| format!("dev-{n:03}")).collect()
}

const fn default_display_limit() -> usize {
    10
}

const fn default_command_latency_ms() -> u64 {
    800
}

//! Data model shared between the telemetry source, the hub and its subscribers.
//!
//! Everything in here crosses the websocket boundary as JSON, so field names are
//! camelCase and enums serialize to their lowercase names.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Define a fieldless enum together with its wire name per variant.
///
/// Generates `ALL`, `as_str` and a `Display` impl writing that name.
#[macro_export]
macro_rules! define_enum_with_str {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident => $str:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )*
        }

        impl $name {
            /// All variants, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)*];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)*
                }
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_enum_with_str! {
    /// Reachability of a device as last reported.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DeviceStatus {
        Online => "online",
        Offline => "offline",
    }
}

define_enum_with_str! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        Warning => "warning",
        Error => "error",
        Info => "info",
    }
}

define_enum_with_str! {
    /// Connection state of the distribution hub towards its telemetry source.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ConnectionState {
        #[default]
        Disconnected => "disconnected",
        Connecting => "connecting",
        Connected => "connected",
    }
}

/// Metric name => value. Absent keys mean the device did not report that metric.
pub type Metrics = BTreeMap<String, f64>;

/// A point-in-time state record for one device, superseding prior snapshots for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: DeviceStatus,
    #[serde(default)]
    pub metrics: Metrics,
}

impl DeviceSnapshot {
    #[must_use]
    pub fn online(device_id: impl Into<String>, timestamp: DateTime<Utc>, metrics: Metrics) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            status: DeviceStatus::Online,
            metrics,
        }
    }

    /// Offline snapshots never carry metrics.
    #[must_use]
    pub fn offline(device_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            status: DeviceStatus::Offline,
            metrics: Metrics::new(),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    /// Whether the snapshot honours the offline-means-no-metrics rule.
    ///
    /// Public fields and `Deserialize` allow building snapshots that break it.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.is_online() || self.metrics.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub id: String,
    pub device_id: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCounts {
    pub warning: u32,
    pub error: u32,
    pub info: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransfer {
    pub sent_bytes: f64,
    pub received_bytes: f64,
}

/// Aggregate fleet figures. Replaced wholesale on every emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemAnalyticsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_devices: u32,
    pub online_devices: u32,
    pub offline_devices: u32,
    pub total_events: u32,
    pub alert_counts: AlertCounts,
    pub system_health_percent: f64,
    pub network_latency_ms: f64,
    pub data_transfer: DataTransfer,
}

/// A command issued by a UI surface against one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub device_id: String,
    pub command_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Command {
    #[must_use]
    pub fn new(device_id: impl Into<String>, command_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            command_name: command_name.into(),
            parameters: None,
        }
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Map<String, serde_json::Value>) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// What the device side answered to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub command_id: String,
}

/// A device as returned by the listing collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub status: DeviceStatus,
    #[serde(rename = "type")]
    pub kind: String,
    pub location: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    #[serde(flatten)]
    pub device: Device,
    pub firmware_version: String,
    pub ip_address: String,
    pub mac_address: String,
    pub uptime_secs: u64,
    pub description: String,
}

//! In-process stand-ins for the device backend: a paged device directory, a
//! command endpoint and a status roster the dispatcher can consult.

use alloc::sync::Arc;
use core::time::Duration;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use chrono::{TimeDelta, Utc};
use futures::future::BoxFuture;
use thiserror::Error as ThisError;
use tokio::time::sleep;
use tracing::{Instrument as _, debug, info};

use fleetpulse_common::{
    Command, CommandResult, Device, DeviceDetails, DeviceSnapshot, DeviceStatus,
};

use crate::{
    config::FleetConfig,
    dispatch::{CommandTransport, DeviceStatusLookup},
};

/// Devices per page returned by [`DeviceDirectory::list_devices`].
pub const PAGE_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum FleetError {
    #[error("Device {0} not found")]
    NotFound(String),
}

/// Read access to the fleet's device listing.
pub trait DeviceDirectory: Send + Sync {
    /// One page of devices whose name, location or type contains `query`, ignoring case.
    ///
    /// Pages start at 1; pages past the end are empty.
    fn list_devices<'a>(
        &'a self,
        query: Option<&'a str>,
        page: usize,
    ) -> BoxFuture<'a, Result<Vec<Device>, FleetError>>;

    /// # Errors
    ///
    /// Returns [`FleetError::NotFound`] for an unknown id.
    fn get_device_details<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxFuture<'a, Result<DeviceDetails, FleetError>>;
}

struct ReferenceDevice {
    id: &'static str,
    name: &'static str,
    online: bool,
    kind: &'static str,
    location: &'static str,
    last_seen_secs_ago: i64,
    firmware_version: &'static str,
    mac_suffix: &'static str,
    uptime_secs: u64,
    description: &'static str,
}

#[rustfmt::skip]
const REFERENCE_FLEET: [ReferenceDevice; 15] = [
    ReferenceDevice { id: "dev-001", name: "Water Tank Sensor A1", online: true, kind: "Water Level Sensor", location: "Building A - Roof", last_seen_secs_ago: 0, firmware_version: "v2.1.3", mac_suffix: "B7", uptime_secs: 864_000, description: "Primary water tank level sensor for Building A" },
    ReferenceDevice { id: "dev-002", name: "Water Tank Sensor B2", online: true, kind: "Water Level Sensor", location: "Building B - Roof", last_seen_secs_ago: 300, firmware_version: "v2.1.3", mac_suffix: "B8", uptime_secs: 432_000, description: "Primary water tank level sensor for Building B" },
    ReferenceDevice { id: "dev-003", name: "Pump Controller 1", online: false, kind: "Pump Controller", location: "Building A - Basement", last_seen_secs_ago: 7200, firmware_version: "v1.5.2", mac_suffix: "B9", uptime_secs: 0, description: "Main pump controller - currently offline" },
    ReferenceDevice { id: "dev-004", name: "Flow Meter X1", online: true, kind: "Flow Meter", location: "Building C - Ground Floor", last_seen_secs_ago: 0, firmware_version: "v2.0.1", mac_suffix: "BA", uptime_secs: 1_296_000, description: "Water flow measurement device" },
    ReferenceDevice { id: "dev-005", name: "Temperature Sensor T1", online: true, kind: "Temperature Sensor", location: "Building A - Ground Floor", last_seen_secs_ago: 120, firmware_version: "v2.1.0", mac_suffix: "BB", uptime_secs: 720_000, description: "Temperature monitoring sensor" },
    ReferenceDevice { id: "dev-006", name: "Pressure Sensor P1", online: true, kind: "Pressure Sensor", location: "Building B - Basement", last_seen_secs_ago: 60, firmware_version: "v2.0.5", mac_suffix: "BC", uptime_secs: 950_000, description: "Water pressure monitoring device" },
    ReferenceDevice { id: "dev-007", name: "Valve Controller V1", online: true, kind: "Valve Controller", location: "Building C - Basement", last_seen_secs_ago: 0, firmware_version: "v1.8.2", mac_suffix: "BD", uptime_secs: 1_100_000, description: "Automated valve control system" },
    ReferenceDevice { id: "dev-008", name: "Water Quality Sensor Q1", online: false, kind: "Water Quality Sensor", location: "Building A - Ground Floor", last_seen_secs_ago: 3600, firmware_version: "v1.9.1", mac_suffix: "BE", uptime_secs: 0, description: "Water quality analysis sensor - offline" },
    ReferenceDevice { id: "dev-009", name: "Humidity Sensor H1", online: true, kind: "Humidity Sensor", location: "Building B - 2nd Floor", last_seen_secs_ago: 180, firmware_version: "v2.2.0", mac_suffix: "BF", uptime_secs: 680_000, description: "Environmental humidity monitoring" },
    ReferenceDevice { id: "dev-010", name: "Flow Meter X2", online: true, kind: "Flow Meter", location: "Building D - Ground Floor", last_seen_secs_ago: 90, firmware_version: "v2.0.1", mac_suffix: "C0", uptime_secs: 850_000, description: "Secondary flow meter for Building D" },
    ReferenceDevice { id: "dev-011", name: "Pump Controller 2", online: true, kind: "Pump Controller", location: "Building B - Basement", last_seen_secs_ago: 0, firmware_version: "v1.6.3", mac_suffix: "C1", uptime_secs: 1_200_000, description: "Backup pump controller for Building B" },
    ReferenceDevice { id: "dev-012", name: "Water Tank Sensor C3", online: false, kind: "Water Level Sensor", location: "Building C - Roof", last_seen_secs_ago: 14_400, firmware_version: "v2.1.3", mac_suffix: "C2", uptime_secs: 0, description: "Water tank level sensor - needs maintenance" },
    ReferenceDevice { id: "dev-013", name: "Leak Detection Sensor L1", online: true, kind: "Leak Detector", location: "Building A - 1st Floor", last_seen_secs_ago: 240, firmware_version: "v3.0.1", mac_suffix: "C3", uptime_secs: 920_000, description: "Advanced leak detection system" },
    ReferenceDevice { id: "dev-014", name: "Energy Monitor E1", online: true, kind: "Energy Monitor", location: "Building D - Electrical Room", last_seen_secs_ago: 0, firmware_version: "v2.5.0", mac_suffix: "C4", uptime_secs: 1_500_000, description: "Real-time energy consumption monitor" },
    ReferenceDevice { id: "dev-015", name: "Smart Valve SV1", online: true, kind: "Smart Valve", location: "Building C - 1st Floor", last_seen_secs_ago: 150, firmware_version: "v1.7.4", mac_suffix: "C5", uptime_secs: 780_000, description: "IoT-enabled smart valve with remote control" },
];

impl ReferenceDevice {
    fn details(&self, index: usize) -> DeviceDetails {
        DeviceDetails {
            device: Device {
                id: self.id.to_string(),
                name: self.name.to_string(),
                status: if self.online {
                    DeviceStatus::Online
                } else {
                    DeviceStatus::Offline
                },
                kind: self.kind.to_string(),
                location: self.location.to_string(),
                last_seen: Utc::now() - TimeDelta::seconds(self.last_seen_secs_ago),
            },
            firmware_version: self.firmware_version.to_string(),
            ip_address: format!("192.168.1.{}", 101 + index),
            mac_address: format!("00:1B:44:11:3A:{}", self.mac_suffix),
            uptime_secs: self.uptime_secs,
            description: self.description.to_string(),
        }
    }
}

fn matches_query(device: &Device, query: &str) -> bool {
    let query = query.to_lowercase();
    [&device.name, &device.location, &device.kind]
        .into_iter()
        .any(|field| field.to_lowercase().contains(&query))
}

/// A fixed fleet of devices that answers listings and commands from memory.
#[derive(Debug, Clone)]
pub struct MockFleet {
    devices: Vec<DeviceDetails>,
    command_latency: Duration,
}

impl MockFleet {
    /// The fifteen reference devices; `dev-003`, `dev-008` and `dev-012` are offline.
    #[must_use]
    pub fn reference() -> Self {
        Self {
            devices: REFERENCE_FLEET
                .iter()
                .enumerate()
                .map(|(index, device)| device.details(index))
                .collect(),
            command_latency: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn from_config(config: &FleetConfig) -> Self {
        Self::reference().with_command_latency(config.command_latency())
    }

    #[must_use]
    pub const fn with_command_latency(mut self, latency: Duration) -> Self {
        self.command_latency = latency;
        self
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().map(|details| &details.device)
    }

    #[must_use]
    pub fn device_ids(&self) -> Vec<String> {
        self.devices().map(|device| device.id.clone()).collect()
    }

    fn find(&self, device_id: &str) -> Option<&DeviceDetails> {
        self.devices
            .iter()
            .find(|details| details.device.id == device_id)
    }

    /// Change the status the fleet reports for a device. Returns whether it exists.
    pub fn set_status(&mut self, device_id: &str, status: DeviceStatus) -> bool {
        match self
            .devices
            .iter_mut()
            .find(|details| details.device.id == device_id)
        {
            Some(details) => {
                details.device.status = status;
                true
            }
            None => false,
        }
    }
}

impl DeviceDirectory for MockFleet {
    fn list_devices<'a>(
        &'a self,
        query: Option<&'a str>,
        page: usize,
    ) -> BoxFuture<'a, Result<Vec<Device>, FleetError>> {
        Box::pin(async move {
            let Some(skip) = page.checked_sub(1).map(|index| index * PAGE_SIZE) else {
                return Ok(Vec::new());
            };
            let matching = self
                .devices()
                .filter(|device| query.is_none_or(|query| matches_query(device, query)));
            let page_devices: Vec<Device> = matching.skip(skip).take(PAGE_SIZE).cloned().collect();
            debug!(?query, page, returned = page_devices.len(), "Listed devices");
            Ok(page_devices)
        })
    }

    fn get_device_details<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxFuture<'a, Result<DeviceDetails, FleetError>> {
        Box::pin(async move {
            self.find(device_id)
                .cloned()
                .ok_or_else(|| FleetError::NotFound(device_id.to_string()))
        })
    }
}

impl CommandTransport for MockFleet {
    fn post_command(&self, command: Command) -> BoxFuture<'_, eyre::Result<CommandResult>> {
        Box::pin(
            async move {
                if !self.command_latency.is_zero() {
                    sleep(self.command_latency).await;
                }
                let device = &self
                    .find(&command.device_id)
                    .ok_or_else(|| FleetError::NotFound(command.device_id.clone()))?
                    .device;
                let command_id = format!("cmd-{}", Utc::now().timestamp_millis());
                let result = if device.status == DeviceStatus::Online {
                    CommandResult {
                        success: true,
                        message: format!("Command \"{}\" sent to {}", command.command_name, device.name),
                        command_id,
                    }
                } else {
                    CommandResult {
                        success: false,
                        message: format!(
                            "Device {} is offline and cannot process commands",
                            device.name
                        ),
                        command_id,
                    }
                };
                info!(
                    device_id = %command.device_id,
                    command = %command.command_name,
                    parameters = ?command.parameters,
                    success = result.success,
                    "Mock fleet handled command"
                );
                Ok(result)
            }
            .in_current_span(),
        )
    }
}

/// Last known status per device, fed from the directory and from live snapshots.
#[derive(Debug, Default)]
pub struct DeviceRoster {
    statuses: RwLock<HashMap<String, DeviceStatus>>,
}

impl DeviceRoster {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the roster with every device the directory lists, walking all pages.
    ///
    /// # Errors
    ///
    /// Returns the directory's error; the roster is left untouched in that case.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, directory: &dyn DeviceDirectory) -> Result<usize, FleetError> {
        let mut statuses = HashMap::new();
        for page in 1.. {
            let devices = directory.list_devices(None, page).await?;
            let last_page = devices.len() < PAGE_SIZE;
            statuses.extend(devices.into_iter().map(|device| (device.id, device.status)));
            if last_page {
                break;
            }
        }
        let count = statuses.len();
        *self.statuses.write().unwrap_or_else(PoisonError::into_inner) = statuses;
        info!(devices = count, "Device roster refreshed");
        Ok(count)
    }

    /// Record the status carried by a live snapshot.
    pub fn observe(&self, snapshot: &DeviceSnapshot) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.device_id.clone(), snapshot.status);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeviceStatusLookup for DeviceRoster {
    fn status_of(&self, device_id: &str) -> Option<DeviceStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .copied()
    }
}

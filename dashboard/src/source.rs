//! Telemetry sources feeding the [`DistributionHub`](crate::hub::DistributionHub).
//!
//! [`SimulatedSource`] stands in for a real device backend: after a short connect
//! delay it reports the connection as up and then emits random device snapshots,
//! analytics and alerts on three independent tickers.

use alloc::sync::Arc;
use core::{iter, time::Duration};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng as _, rngs::StdRng, seq::IndexedRandom as _};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep},
};
use tracing::{Instrument as _, debug, error, info};

use fleetpulse_common::{
    AlertCounts, AlertEvent, DataTransfer, DeviceSnapshot, Metrics, Severity,
    SystemAnalyticsSnapshot,
};

use crate::{
    config::TelemetryConfig,
    hub::{EventSink, HubEvent},
};

/// Something that produces telemetry for the hub.
///
/// Implementations must call [`EventSink::mark_connected`] once their connection is
/// established and may then [`EventSink::emit`] events until [`stop`](Self::stop) is called.
pub trait TelemetrySource: Send + Sync {
    fn start(&self, sink: EventSink);
    fn stop(&self);
}

struct MetricRange {
    name: &'static str,
    min: f64,
    max: f64,
    decimals: i32,
}

const METRIC_RANGES: [MetricRange; 8] = [
    MetricRange { name: "temperature", min: 15.0, max: 45.0, decimals: 1 },
    MetricRange { name: "humidity", min: 30.0, max: 70.0, decimals: 1 },
    MetricRange { name: "pressure", min: 800.0, max: 1000.0, decimals: 1 },
    MetricRange { name: "battery", min: 0.0, max: 100.0, decimals: 0 },
    MetricRange { name: "signal", min: 0.0, max: 100.0, decimals: 0 },
    MetricRange { name: "waterLevel", min: 20.0, max: 100.0, decimals: 1 },
    MetricRange { name: "flow", min: 10.0, max: 60.0, decimals: 2 },
    MetricRange { name: "energy", min: 500.0, max: 1500.0, decimals: 2 },
];

/// Names of every metric an online simulated device reports.
pub fn metric_names() -> impl Iterator<Item = &'static str> {
    METRIC_RANGES.iter().map(|range| range.name)
}

/// The fixed message pool for alerts of a severity.
#[must_use]
pub const fn alert_messages(severity: Severity) -> &'static [&'static str] {
    match severity {
        Severity::Warning => &["Battery level low", "Signal strength degraded", "Temperature high"],
        Severity::Error => &["Connection lost", "Sensor malfunction", "Critical failure"],
        Severity::Info => &[
            "Maintenance scheduled",
            "Firmware update available",
            "Configuration updated",
        ],
    }
}

/// Clamp into `0.0..=1.0`; NaN counts as never.
const fn sanitize_probability(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Generate a snapshot for `device_id`, Online with probability `online_probability`.
pub fn device_snapshot<R: Rng + ?Sized>(
    rng: &mut R,
    device_id: &str,
    online_probability: f64,
    timestamp: DateTime<Utc>,
) -> DeviceSnapshot {
    if !rng.random_bool(sanitize_probability(online_probability)) {
        return DeviceSnapshot::offline(device_id, timestamp);
    }
    let metrics: Metrics = METRIC_RANGES
        .iter()
        .map(|range| {
            let value = round_to(rng.random_range(range.min..=range.max), range.decimals);
            (range.name.to_string(), value)
        })
        .collect();
    DeviceSnapshot::online(device_id, timestamp, metrics)
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "fraction is within 0.8..=1.0, so the product stays within 0..=total"
)]
fn online_share(total: u32, fraction: f64) -> u32 {
    ((f64::from(total) * fraction).floor() as u32).min(total)
}

/// Generate fleet-wide figures for a fleet of `total_devices`.
pub fn analytics_snapshot<R: Rng + ?Sized>(
    rng: &mut R,
    total_devices: u32,
    timestamp: DateTime<Utc>,
) -> SystemAnalyticsSnapshot {
    let online_devices = online_share(total_devices, rng.random_range(0.8..=1.0));
    SystemAnalyticsSnapshot {
        timestamp,
        total_devices,
        online_devices,
        offline_devices: total_devices - online_devices,
        total_events: rng.random_range(5000..6000),
        alert_counts: AlertCounts {
            warning: rng.random_range(0..10),
            error: rng.random_range(0..3),
            info: rng.random_range(0..15),
        },
        system_health_percent: round_to(rng.random_range(90.0..=100.0), 1),
        network_latency_ms: round_to(rng.random_range(10.0..=60.0), 1),
        data_transfer: DataTransfer {
            sent_bytes: round_to(rng.random_range(5000.0..=6000.0), 2),
            received_bytes: round_to(rng.random_range(10_000.0..=12_000.0), 2),
        },
    }
}

/// `alert_<unix millis>_<9 base36 chars>`
fn alert_id<R: Rng + ?Sized>(rng: &mut R, timestamp: DateTime<Utc>) -> String {
    let suffix: String = iter::repeat_with(|| {
        char::from_digit(rng.random_range(0..36), 36).unwrap_or('0')
    })
    .take(9)
    .collect();
    format!("alert_{}_{suffix}", timestamp.timestamp_millis())
}

/// Generate an alert for `device_id` with a random severity and message.
pub fn random_alert<R: Rng + ?Sized>(
    rng: &mut R,
    device_id: &str,
    timestamp: DateTime<Utc>,
) -> AlertEvent {
    let severity = Severity::ALL.choose(rng).copied().unwrap_or(Severity::Info);
    let message = alert_messages(severity)
        .choose(rng)
        .copied()
        .unwrap_or_default();
    AlertEvent {
        id: alert_id(rng, timestamp),
        device_id: device_id.to_string(),
        severity,
        message: message.to_string(),
        timestamp,
    }
}

/// Roll for an alert on a random device of `devices`.
pub fn maybe_alert<R: Rng + ?Sized>(
    rng: &mut R,
    devices: &[String],
    probability: f64,
    timestamp: DateTime<Utc>,
) -> Option<AlertEvent> {
    if !rng.random_bool(sanitize_probability(probability)) {
        return None;
    }
    let device_id = devices.choose(rng)?;
    Some(random_alert(rng, device_id, timestamp))
}

/// Random telemetry for a configured device set.
#[derive(Debug)]
pub struct SimulatedSource {
    config: Arc<TelemetryConfig>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedSource {
    #[must_use]
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config: Arc::new(config),
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TelemetrySource for SimulatedSource {
    fn start(&self, sink: EventSink) {
        let Ok(handle) = Handle::try_current() else {
            error!("No tokio runtime available, cannot start simulated telemetry");
            sink.connection_lost();
            return;
        };
        let task = handle.spawn(run_simulation(self.config.clone(), sink).in_current_span());
        if let Some(previous) = self.task().replace(task) {
            debug!("Replacing previous simulation run");
            previous.abort();
        }
    }

    fn stop(&self) {
        if let Some(task) = self.task().take() {
            task.abort();
            info!("Simulated telemetry stopped");
        }
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[tracing::instrument(skip_all, fields(devices = config.devices.len()))]
async fn run_simulation(config: Arc<TelemetryConfig>, sink: EventSink) {
    // ThreadRng is not Send, so the task owns its own generator.
    let mut rng = StdRng::from_os_rng();
    let total_devices = u32::try_from(config.devices.len()).unwrap_or(u32::MAX);

    sleep(config.connect_delay()).await;
    if !sink.mark_connected() {
        debug!("Hub is no longer waiting for this connection");
        return;
    }

    if let Some(first) = config.devices.first() {
        let snapshot = device_snapshot(&mut rng, first, config.online_probability, Utc::now());
        sink.emit(&HubEvent::DeviceUpdate(snapshot));
    }
    sink.emit(&HubEvent::SystemAnalytics(analytics_snapshot(
        &mut rng,
        total_devices,
        Utc::now(),
    )));

    let mut device_ticker = ticker(config.device_interval());
    let mut analytics_ticker = ticker(config.analytics_interval());
    let mut alert_ticker = ticker(config.alert_interval());

    loop {
        let event = tokio::select! {
            _ = device_ticker.tick() => config.devices.choose(&mut rng).map(|device_id| {
                HubEvent::DeviceUpdate(device_snapshot(
                    &mut rng,
                    device_id,
                    config.online_probability,
                    Utc::now(),
                ))
            }),
            _ = analytics_ticker.tick() => Some(HubEvent::SystemAnalytics(analytics_snapshot(
                &mut rng,
                total_devices,
                Utc::now(),
            ))),
            _ = alert_ticker.tick() => {
                maybe_alert(&mut rng, &config.devices, config.alert_probability, Utc::now())
                    .map(HubEvent::DeviceAlert)
            }
        };
        if let Some(event) = event {
            sink.emit(&event);
        }
    }
}

//! `fleetpulse tail`: run the simulated fleet without a server and log what a live
//! view observes.

use core::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::{
    app::shutdown_signal,
    config::DashboardConfig,
    hub::{DistributionHub, EventKind, HubEvent, Subscriber},
    source::SimulatedSource,
    store::LiveView,
};

fn log_events(hub: &DistributionHub) -> Subscriber {
    let subscriber = hub.subscriber();
    subscriber.on(EventKind::Connected, |_| info!("Connected"));
    subscriber.on(EventKind::Disconnected, |_| info!("Disconnected"));
    subscriber.on(EventKind::DeviceUpdate, |event| {
        if let HubEvent::DeviceUpdate(ref snapshot) = *event {
            info!(
                device_id = %snapshot.device_id,
                status = %snapshot.status,
                metrics = ?snapshot.metrics,
                "Device update"
            );
        }
    });
    subscriber.on(EventKind::SystemAnalytics, |event| {
        if let HubEvent::SystemAnalytics(ref analytics) = *event {
            info!(
                online = analytics.online_devices,
                total = analytics.total_devices,
                health = analytics.system_health_percent,
                latency_ms = analytics.network_latency_ms,
                "System analytics"
            );
        }
    });
    subscriber.on(EventKind::DeviceAlert, |event| {
        if let HubEvent::DeviceAlert(ref alert) = *event {
            info!(
                device_id = %alert.device_id,
                severity = %alert.severity,
                "Alert: {}",
                alert.message
            );
        }
    });
    subscriber
}

/// Tail the simulated fleet for `seconds`, or until ctrl-c.
#[tracing::instrument(skip_all)]
pub async fn run(config: &DashboardConfig, seconds: Option<u64>) {
    let hub = DistributionHub::new(SimulatedSource::new(config.telemetry.clone()));
    let view = LiveView::attach(&hub, config.store);
    let logger = log_events(&hub);

    hub.connect();
    match seconds {
        Some(seconds) => {
            tokio::select! {
                () = sleep(Duration::from_secs(seconds)) => {}
                () = shutdown_signal() => {}
            }
        }
        None => shutdown_signal().await,
    }
    hub.disconnect();
    drop(logger);

    view.read(|store| {
        for snapshot in store.snapshot_view() {
            info!(
                device_id = %snapshot.device_id,
                status = %snapshot.status,
                at = %snapshot.timestamp,
                "Last seen"
            );
        }
        info!(
            devices = store.len(),
            alerts = store.alerts().len(),
            health = store.analytics().map(|a| a.system_health_percent),
            "Tail finished"
        );
    });
}

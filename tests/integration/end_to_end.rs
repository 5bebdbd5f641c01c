//! The core pipeline end to end: source, hub, store and dispatcher wired together in-process.

use alloc::sync::Arc;
use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::{sync::Mutex, thread};

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::time::sleep;

use fleetpulse_common::{Command, CommandResult, DeviceSnapshot, DeviceStatus, Metrics};
use fleetpulse_dashboard::{
    config::{StoreConfig, TelemetryConfig},
    dispatch::{CommandDispatcher, CommandTransport, DispatchState, GuardRejection, SendOutcome},
    fleet::{DeviceRoster, MockFleet},
    hub::{DistributionHub, EventKind, EventSink, HubEvent},
    source::{SimulatedSource, TelemetrySource},
    store::{DeviceStateStore, LiveView},
};

/// Counts calls before handing them to an inner transport.
struct CountingTransport<T> {
    inner: T,
    calls: AtomicUsize,
}

impl<T> CountingTransport<T> {
    fn new(inner: T) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<T: CommandTransport> CommandTransport for CountingTransport<T> {
    fn post_command(&self, command: Command) -> BoxFuture<'_, eyre::Result<CommandResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.post_command(command)
    }
}

/// Always answers with the same result.
struct FixedAnswer(CommandResult);

impl CommandTransport for FixedAnswer {
    fn post_command(&self, _command: Command) -> BoxFuture<'_, eyre::Result<CommandResult>> {
        let result = self.0.clone();
        Box::pin(async move { Ok(result) })
    }
}

#[tokio::test(start_paused = true)]
async fn telemetry_reaches_a_live_view_within_one_interval() {
    let telemetry = TelemetryConfig::default();
    let interval = telemetry.device_interval();
    let hub = DistributionHub::new(SimulatedSource::new(telemetry));
    let view = LiveView::attach(&hub, StoreConfig::default());
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = hub.subscriber();
    {
        let updates = updates.clone();
        counter.on(EventKind::DeviceUpdate, move |_| {
            updates.fetch_add(1, Ordering::SeqCst);
        });
    }

    hub.connect();
    sleep(interval).await;

    assert!(updates.load(Ordering::SeqCst) >= 1, "no device update within one interval");
    assert!(!view.snapshot_view().is_empty(), "view is still empty");
    assert!(view.analytics().is_some(), "initial analytics missing");
}

#[tokio::test]
async fn command_to_online_device_succeeds_with_exact_message() {
    let roster = DeviceRoster::new();
    roster.observe(&DeviceSnapshot::online("X", Utc::now(), Metrics::new()));
    let transport = CountingTransport::new(FixedAnswer(CommandResult {
        success: true,
        message: "Command \"PING\" sent to X".to_string(),
        command_id: "cmd-1".to_string(),
    }));
    let dispatcher = CommandDispatcher::new(transport.clone(), roster);
    assert_eq!(dispatcher.state(), DispatchState::Idle);

    dispatcher.send(Command::new("X", "PING")).await;

    assert_eq!(
        dispatcher.state(),
        DispatchState::Succeeded {
            message: "Command \"PING\" sent to X".to_string(),
            command_id: "cmd-1".to_string(),
        }
    );
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn command_to_offline_device_never_reaches_transport() {
    let fleet = MockFleet::reference();
    let roster = DeviceRoster::new();
    roster.refresh(&fleet).await.unwrap();
    let transport = CountingTransport::new(fleet);
    let dispatcher = CommandDispatcher::new(transport.clone(), roster);

    let outcome = dispatcher.send(Command::new("dev-003", "REBOOT")).await;

    assert_eq!(
        outcome,
        SendOutcome::Rejected(GuardRejection::DeviceOffline("dev-003".to_string()))
    );
    assert_eq!(transport.calls(), 0);
    assert_eq!(dispatcher.state(), DispatchState::Idle);
}

#[tokio::test(start_paused = true)]
async fn unregistered_alert_callback_leaves_the_log_unchanged() {
    let telemetry = TelemetryConfig {
        alert_interval_ms: 1000,
        alert_probability: 1.0,
        ..TelemetryConfig::default()
    };
    let hub = DistributionHub::new(SimulatedSource::new(telemetry));
    let store = Arc::new(Mutex::new(DeviceStateStore::default()));
    let alerts_seen = Arc::new(AtomicUsize::new(0));

    let consumer = hub.subscriber();
    {
        let store = store.clone();
        consumer.on(EventKind::DeviceAlert, move |event| {
            store.lock().unwrap().apply(event);
        });
    }
    let witness = hub.subscriber();
    {
        let alerts_seen = alerts_seen.clone();
        witness.on(EventKind::DeviceAlert, move |_| {
            alerts_seen.fetch_add(1, Ordering::SeqCst);
        });
    }

    hub.connect();
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(store.lock().unwrap().alerts().len(), 1);

    assert!(consumer.off(EventKind::DeviceAlert), "consumer was registered");
    let before: Vec<String> = store.lock().unwrap().alerts().map(|a| a.id.clone()).collect();
    sleep(Duration::from_secs(5)).await;
    let after: Vec<String> = store.lock().unwrap().alerts().map(|a| a.id.clone()).collect();

    assert!(alerts_seen.load(Ordering::SeqCst) > 1, "alert ticks should keep firing");
    assert_eq!(before, after);
}

/// A source that connects immediately and emits one fixed snapshot.
#[derive(Default)]
struct ScriptedSource {
    stops: AtomicUsize,
}

impl TelemetrySource for ScriptedSource {
    fn start(&self, sink: EventSink) {
        assert!(sink.mark_connected(), "hub should be waiting for us");
        sink.emit(&HubEvent::DeviceUpdate(DeviceSnapshot::offline("dev-042", Utc::now())));
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn any_source_honouring_the_sink_contract_can_feed_the_hub() {
    let source = Arc::new(ScriptedSource::default());
    let hub = DistributionHub::with_source(source.clone());
    let view = LiveView::attach(&hub, StoreConfig::default());

    hub.connect();
    assert!(hub.is_connected(), "scripted source connects synchronously");
    assert_eq!(
        view.read(|store| store.device("dev-042").map(|s| s.status)),
        Some(DeviceStatus::Offline)
    );

    hub.disconnect();
    assert_eq!(source.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_update_reaches_subscribers_after_disconnected() {
    let telemetry = TelemetryConfig {
        connect_delay_ms: 1,
        device_interval_ms: 1,
        ..TelemetryConfig::default()
    };
    let hub = DistributionHub::new(SimulatedSource::new(telemetry));
    let slow = hub.subscriber();
    slow.on(EventKind::DeviceUpdate, |_| {
        thread::sleep(Duration::from_millis(20));
    });
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = hub.subscriber();
    for kind in [EventKind::DeviceUpdate, EventKind::Disconnected] {
        let log = log.clone();
        recorder.on(kind, move |event| log.lock().unwrap().push(event.kind()));
    }

    hub.connect();
    sleep(Duration::from_millis(30)).await;
    hub.disconnect();
    sleep(Duration::from_millis(50)).await;

    let log = log.lock().unwrap();
    assert!(log.contains(&EventKind::DeviceUpdate), "source never delivered");
    assert_eq!(
        log.last(),
        Some(&EventKind::Disconnected),
        "update delivered after disconnected: {log:?}"
    );
}

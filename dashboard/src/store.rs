//! Subscriber-side state: the latest snapshot per device, a bounded alert log and
//! the current analytics, reduced from hub events.

use alloc::{collections::VecDeque, sync::Arc};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, trace, warn};

use fleetpulse_common::{AlertEvent, DeviceSnapshot, DeviceStatus, SystemAnalyticsSnapshot};

use crate::{
    config::{OrderingPolicy, StoreConfig},
    dispatch::DeviceStatusLookup,
    hub::{DistributionHub, EventKind, HubEvent, Subscriber},
};

/// Maximum number of alerts kept, newest first.
pub const ALERT_LOG_CAPACITY: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct DeviceStateStore {
    config: StoreConfig,
    devices: HashMap<String, DeviceSnapshot>,
    alerts: VecDeque<AlertEvent>,
    analytics: Option<SystemAnalyticsSnapshot>,
}

impl DeviceStateStore {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Upsert a snapshot by device id. Returns whether the store changed.
    ///
    /// Offline snapshots that carry metrics are refused.
    pub fn merge(&mut self, snapshot: DeviceSnapshot) -> bool {
        if !snapshot.is_consistent() {
            warn!(device_id = %snapshot.device_id, "Refusing offline snapshot with metrics");
            return false;
        }
        if let Some(current) = self.devices.get(&snapshot.device_id) {
            if self.config.ordering == OrderingPolicy::RejectStale
                && snapshot.timestamp <= current.timestamp
            {
                debug!(
                    device_id = %snapshot.device_id,
                    stored = %current.timestamp,
                    received = %snapshot.timestamp,
                    "Ignoring stale snapshot"
                );
                return false;
            }
            if *current == snapshot {
                return false;
            }
        }
        trace!(device_id = %snapshot.device_id, status = %snapshot.status, "Merged snapshot");
        self.devices.insert(snapshot.device_id.clone(), snapshot);
        true
    }

    /// Prepend an alert, dropping the oldest beyond [`ALERT_LOG_CAPACITY`].
    pub fn append_alert(&mut self, alert: AlertEvent) {
        self.alerts.push_front(alert);
        self.alerts.truncate(ALERT_LOG_CAPACITY);
    }

    pub fn replace_analytics(&mut self, analytics: SystemAnalyticsSnapshot) {
        self.analytics = Some(analytics);
    }

    /// Devices ordered by most recent snapshot first, capped at the display limit.
    #[must_use]
    pub fn snapshot_view(&self) -> Vec<DeviceSnapshot> {
        let mut view: Vec<&DeviceSnapshot> = self.devices.values().collect();
        view.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        view.into_iter()
            .take(self.config.display_limit)
            .cloned()
            .collect()
    }

    /// Alerts, newest first.
    pub fn alerts(&self) -> impl ExactSizeIterator<Item = &AlertEvent> {
        self.alerts.iter()
    }

    #[must_use]
    pub const fn analytics(&self) -> Option<&SystemAnalyticsSnapshot> {
        self.analytics.as_ref()
    }

    #[must_use]
    pub fn device(&self, device_id: &str) -> Option<&DeviceSnapshot> {
        self.devices.get(device_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Reduce one hub event into the store. Connection events leave it untouched.
    pub fn apply(&mut self, event: &HubEvent) -> bool {
        match *event {
            HubEvent::DeviceUpdate(ref snapshot) => self.merge(snapshot.clone()),
            HubEvent::DeviceAlert(ref alert) => {
                self.append_alert(alert.clone());
                true
            }
            HubEvent::SystemAnalytics(ref analytics) => {
                self.replace_analytics(analytics.clone());
                true
            }
            HubEvent::Connected | HubEvent::Disconnected => false,
        }
    }
}

impl DeviceStatusLookup for DeviceStateStore {
    fn status_of(&self, device_id: &str) -> Option<DeviceStatus> {
        self.device(device_id).map(|snapshot| snapshot.status)
    }
}

impl DeviceStatusLookup for Mutex<DeviceStateStore> {
    fn status_of(&self, device_id: &str) -> Option<DeviceStatus> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status_of(device_id)
    }
}

pub type SharedStore = Arc<Mutex<DeviceStateStore>>;

/// A [`DeviceStateStore`] kept current by its own hub subscription.
///
/// Dropping the view removes its callbacks from the hub.
#[derive(Debug)]
pub struct LiveView {
    store: SharedStore,
    _subscriber: Subscriber,
}

impl LiveView {
    /// Attach a fresh, empty store to `hub`.
    #[must_use]
    pub fn attach(hub: &DistributionHub, config: StoreConfig) -> Self {
        let store: SharedStore = Arc::new(Mutex::new(DeviceStateStore::new(config)));
        let subscriber = hub.subscriber();
        for kind in [
            EventKind::DeviceUpdate,
            EventKind::DeviceAlert,
            EventKind::SystemAnalytics,
        ] {
            let store = Arc::downgrade(&store);
            subscriber.on(kind, move |event| {
                if let Some(store) = store.upgrade() {
                    store
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .apply(event);
                }
            });
        }
        Self {
            store,
            _subscriber: subscriber,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceStateStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The underlying store, e.g. to serve as a dispatcher's status lookup.
    #[must_use]
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Run `f` against the current store contents.
    pub fn read<T>(&self, f: impl FnOnce(&DeviceStateStore) -> T) -> T {
        f(&self.lock())
    }

    #[must_use]
    pub fn snapshot_view(&self) -> Vec<DeviceSnapshot> {
        self.lock().snapshot_view()
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.lock().alerts().cloned().collect()
    }

    #[must_use]
    pub fn analytics(&self) -> Option<SystemAnalyticsSnapshot> {
        self.lock().analytics().cloned()
    }
}

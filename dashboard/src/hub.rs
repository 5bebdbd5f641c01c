//! The distribution hub: holds the connection state towards the telemetry source and
//! fans every event out to the callbacks registered for its kind.
//!
//! The hub is an explicit instance owned by the composition root. Consumers get a
//! [`Subscriber`] handle from it; each handle owns at most one callback per
//! [`EventKind`], while across handles every registration is invoked, in
//! registration order.
//!
//! Connection changes and deliveries are serialised by a gate, so once a subscriber
//! saw `disconnected` no data event reaches it until the next `connected`. Callbacks
//! run while the gate is held: they may call back into the hub on the same thread,
//! but must not wait on another thread that does.

use alloc::sync::{Arc, Weak};
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
};

use fleetpulse_common::{
    AlertEvent, ConnectionState, DeviceSnapshot, SystemAnalyticsSnapshot, define_enum_with_str,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::source::TelemetrySource;

define_enum_with_str! {
    /// Names of the event slots a subscriber can register for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub enum EventKind {
        Connected => "connected",
        Disconnected => "disconnected",
        DeviceUpdate => "deviceUpdate",
        SystemAnalytics => "systemAnalytics",
        DeviceAlert => "deviceAlert",
    }
}

/// An event as delivered to subscriber callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum HubEvent {
    Connected,
    Disconnected,
    DeviceUpdate(DeviceSnapshot),
    SystemAnalytics(SystemAnalyticsSnapshot),
    DeviceAlert(AlertEvent),
}

impl HubEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match *self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::DeviceUpdate(_) => EventKind::DeviceUpdate,
            Self::SystemAnalytics(_) => EventKind::SystemAnalytics,
            Self::DeviceAlert(_) => EventKind::DeviceAlert,
        }
    }
}

pub type Callback = Arc<dyn Fn(&HubEvent) + Send + Sync>;

/// Identifies a single registration, as returned by [`Subscriber::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Registration {
    token: SubscriptionToken,
    subscriber: SubscriberId,
    kind: EventKind,
    callback: Callback,
}

#[derive(Default)]
struct HubState {
    connection: ConnectionState,
    /// Whether `connect` was ever called; later calls count as reconnect attempts.
    started_once: bool,
    reconnect_attempts: u32,
    registrations: Vec<Registration>,
}

#[derive(Default)]
struct HubCore {
    state: Mutex<HubState>,
    /// Held across a connection check and the delivery that depends on it.
    gate: Mutex<()>,
    /// The thread holding `gate`, so callbacks re-entering the hub don't deadlock.
    gate_holder: Mutex<Option<ThreadId>>,
    next_id: AtomicU64,
}

/// Releases the delivery gate on drop. Re-entrant acquisitions hold nothing.
struct DeliveryGuard<'core> {
    core: &'core HubCore,
    gate: Option<MutexGuard<'core, ()>>,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if self.gate.is_some() {
            *self.core.gate_holder() = None;
        }
    }
}

impl HubCore {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        // Callbacks never run under this lock, so a poisoned guard still holds consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate_holder(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.gate_holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn enter_delivery(&self) -> DeliveryGuard<'_> {
        let current = thread::current().id();
        if *self.gate_holder() == Some(current) {
            return DeliveryGuard {
                core: self,
                gate: None,
            };
        }
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        *self.gate_holder() = Some(current);
        DeliveryGuard {
            core: self,
            gate: Some(gate),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Invoke every callback registered for the event's kind, in registration order.
    ///
    /// The registry lock is released before any callback runs, so callbacks may
    /// register or remove subscriptions themselves.
    fn dispatch(&self, event: &HubEvent) -> usize {
        let kind = event.kind();
        let callbacks: Vec<Callback> = self
            .lock()
            .registrations
            .iter()
            .filter(|reg| reg.kind == kind)
            .map(|reg| reg.callback.clone())
            .collect();

        for callback in &callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                error!(
                    %kind,
                    "Subscriber callback panicked, continuing delivery: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        callbacks.len()
    }

    fn register(
        &self,
        subscriber: SubscriberId,
        kind: EventKind,
        callback: Callback,
    ) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_id());
        let mut state = self.lock();
        // One slot per kind per subscriber: the newest registration replaces the old one.
        state
            .registrations
            .retain(|reg| !(reg.subscriber == subscriber && reg.kind == kind));
        state.registrations.push(Registration {
            token,
            subscriber,
            kind,
            callback,
        });
        token
    }

    fn remove_where(&self, pred: impl Fn(&Registration) -> bool) -> usize {
        let mut state = self.lock();
        let before = state.registrations.len();
        state.registrations.retain(|reg| !pred(reg));
        before - state.registrations.len()
    }
}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// Process-wide broker between a [`TelemetrySource`] and its subscribers.
pub struct DistributionHub {
    core: Arc<HubCore>,
    source: Arc<dyn TelemetrySource>,
}

impl fmt::Debug for DistributionHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.lock();
        f.debug_struct("DistributionHub")
            .field("connection", &state.connection)
            .field("registrations", &state.registrations.len())
            .finish_non_exhaustive()
    }
}

impl DistributionHub {
    #[must_use]
    pub fn new<S: TelemetrySource + 'static>(source: S) -> Arc<Self> {
        Self::with_source(Arc::new(source))
    }

    #[must_use]
    pub fn with_source(source: Arc<dyn TelemetrySource>) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::new(HubCore::default()),
            source,
        })
    }

    /// Create a new subscriber handle. Dropping it removes all of its registrations.
    #[must_use]
    pub fn subscriber(&self) -> Subscriber {
        Subscriber {
            core: Arc::downgrade(&self.core),
            id: SubscriberId(self.core.next_id()),
        }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.core.lock().connection
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// How many times `connect` started the source again after a first connection attempt.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.core.lock().reconnect_attempts
    }

    /// Start the telemetry source unless a connection exists or is already being set up.
    #[tracing::instrument(skip_all)]
    pub fn connect(&self) {
        {
            let mut state = self.core.lock();
            match state.connection {
                ConnectionState::Connected => {
                    debug!("Already connected");
                    return;
                }
                ConnectionState::Connecting => {
                    debug!("Connection already in progress");
                    return;
                }
                ConnectionState::Disconnected => {}
            }
            if state.started_once {
                state.reconnect_attempts += 1;
            }
            state.started_once = true;
            state.connection = ConnectionState::Connecting;
            info!(attempt = state.reconnect_attempts, "Connecting to telemetry source");
        }
        self.source.start(EventSink {
            core: Arc::downgrade(&self.core),
        });
    }

    /// Stop the source and notify `disconnected` subscribers synchronously.
    ///
    /// Waits for a delivery that is already running on another thread to finish.
    #[tracing::instrument(skip_all)]
    pub fn disconnect(&self) {
        let _delivery = self.core.enter_delivery();
        self.source.stop();
        self.core.lock().connection = ConnectionState::Disconnected;
        info!("Disconnected from telemetry source");
        self.core.dispatch(&HubEvent::Disconnected);
    }

    /// Remove a single registration. Returns whether it was still present.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.core.remove_where(|reg| reg.token == token) > 0
    }

    /// Number of live registrations for a kind.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.core
            .lock()
            .registrations
            .iter()
            .filter(|reg| reg.kind == kind)
            .count()
    }
}

/// A consumer's handle on the hub.
#[derive(Debug)]
pub struct Subscriber {
    core: Weak<HubCore>,
    id: SubscriberId,
}

impl Subscriber {
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Register `callback` for `kind`, replacing this handle's previous callback for it.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionToken
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        match self.core.upgrade() {
            Some(core) => core.register(self.id, kind, Arc::new(callback)),
            None => {
                debug!(%kind, "Hub is gone, registration ignored");
                SubscriptionToken(u64::MAX)
            }
        }
    }

    /// Remove this handle's callback for `kind`. Returns whether one was registered.
    pub fn off(&self, kind: EventKind) -> bool {
        let id = self.id;
        self.core.upgrade().is_some_and(|core| {
            core.remove_where(|reg| reg.subscriber == id && reg.kind == kind) > 0
        })
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let id = self.id;
        if let Some(core) = self.core.upgrade() {
            core.remove_where(|reg| reg.subscriber == id);
        }
    }
}

/// The source side of the hub. Handed to [`TelemetrySource::start`].
#[derive(Clone)]
pub struct EventSink {
    core: Weak<HubCore>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("hub_alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

impl EventSink {
    /// Complete a pending connection and notify `connected` subscribers.
    ///
    /// Ignored unless the hub is currently `Connecting`.
    pub fn mark_connected(&self) -> bool {
        let Some(core) = self.core.upgrade() else {
            return false;
        };
        let _delivery = core.enter_delivery();
        {
            let mut state = core.lock();
            if state.connection != ConnectionState::Connecting {
                debug!(state = %state.connection, "Ignoring connected signal");
                return false;
            }
            state.connection = ConnectionState::Connected;
        }
        info!("Telemetry source connected");
        core.dispatch(&HubEvent::Connected);
        true
    }

    /// Report that the source lost its connection on its own.
    pub fn connection_lost(&self) -> bool {
        let Some(core) = self.core.upgrade() else {
            return false;
        };
        let _delivery = core.enter_delivery();
        {
            let mut state = core.lock();
            if state.connection == ConnectionState::Disconnected {
                return false;
            }
            state.connection = ConnectionState::Disconnected;
        }
        info!("Telemetry source lost its connection");
        core.dispatch(&HubEvent::Disconnected);
        true
    }

    /// Deliver a data event to subscribers. Events are dropped while not connected,
    /// as are device snapshots that report metrics for an offline device.
    ///
    /// Returns how many callbacks were invoked.
    pub fn emit(&self, event: &HubEvent) -> usize {
        let Some(core) = self.core.upgrade() else {
            return 0;
        };
        if let HubEvent::DeviceUpdate(ref snapshot) = *event
            && !snapshot.is_consistent()
        {
            warn!(device_id = %snapshot.device_id, "Dropping offline snapshot that carries metrics");
            return 0;
        }
        let _delivery = core.enter_delivery();
        if core.lock().connection != ConnectionState::Connected {
            debug!(kind = %event.kind(), "Dropping event while not connected");
            return 0;
        }
        core.dispatch(event)
    }
}

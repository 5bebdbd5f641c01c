//! Composition root: wires the hub, the live view, the mock fleet and the
//! websocket fan-out together and runs the HTTP server until shutdown.

use alloc::sync::Arc;
use core::net::{IpAddr, SocketAddr};

use eyre::WrapErr as _;
use tokio::{net::TcpListener, signal, sync::broadcast};
use tracing::{error, info};

use crate::{
    config::{DashboardConfig, StoreConfig},
    dispatch::{CommandTransport, DeviceStatusLookup},
    fleet::{DeviceRoster, MockFleet},
    http,
    hub::{DistributionHub, EventKind, HubEvent, Subscriber},
    source::SimulatedSource,
    store::LiveView,
    websocket::WsMessage,
};

/// Capacity of the websocket fan-out channel. Slow clients skip what they miss.
const WS_CHANNEL_CAPACITY: usize = 64;

/// Application state shared across request handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<DistributionHub>,
    /// Server-side view used to bootstrap new websocket clients.
    pub view: Arc<LiveView>,
    /// Status lookup consulted by every connection's dispatcher.
    pub roster: Arc<DeviceRoster>,
    pub transport: Arc<dyn CommandTransport>,
    /// Broadcast sender for distributing hub events to websocket clients.
    pub ws_tx: broadcast::Sender<WsMessage>,
    _bridge: Arc<Subscriber>,
}

impl AppState {
    /// Build the state around an existing hub, with `fleet` as directory and command endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the device roster cannot be loaded from the fleet.
    pub async fn assemble(
        hub: Arc<DistributionHub>,
        fleet: MockFleet,
        store: StoreConfig,
    ) -> eyre::Result<Self> {
        let fleet = Arc::new(fleet);
        let roster = DeviceRoster::new();
        roster
            .refresh(fleet.as_ref())
            .await
            .wrap_err("Failed to load the device roster")?;

        let view = Arc::new(LiveView::attach(&hub, store));
        let (ws_tx, _) = broadcast::channel(WS_CHANNEL_CAPACITY);
        let bridge = Arc::new(bridge_events(&hub, &roster, &ws_tx));

        Ok(Self {
            hub,
            view,
            roster,
            transport: fleet,
            ws_tx,
            _bridge: bridge,
        })
    }

    /// Build the state for a config: simulated telemetry and the reference fleet.
    ///
    /// # Errors
    ///
    /// Returns an error if the device roster cannot be loaded.
    pub async fn from_config(config: &DashboardConfig) -> eyre::Result<Self> {
        let hub = DistributionHub::new(SimulatedSource::new(config.telemetry.clone()));
        Self::assemble(hub, MockFleet::from_config(&config.fleet), config.store).await
    }

    #[must_use]
    pub fn status_lookup(&self) -> Arc<dyn DeviceStatusLookup> {
        self.roster.clone()
    }
}

/// Forward every hub event to websocket clients and keep the roster current.
fn bridge_events(
    hub: &DistributionHub,
    roster: &Arc<DeviceRoster>,
    ws_tx: &broadcast::Sender<WsMessage>,
) -> Subscriber {
    let subscriber = hub.subscriber();
    for &kind in EventKind::ALL {
        let roster = Arc::downgrade(roster);
        let ws_tx = ws_tx.clone();
        subscriber.on(kind, move |event| {
            if let HubEvent::DeviceUpdate(ref snapshot) = *event
                && let Some(roster) = roster.upgrade()
            {
                roster.observe(snapshot);
            }
            // No connected websocket clients is fine.
            drop(ws_tx.send(WsMessage::from(event.clone())));
        });
    }
    subscriber
}

/// Resolves on SIGTERM or ctrl-c.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = signal::ctrl_c() => info!("Received ctrl-c"),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                drop(signal::ctrl_c().await);
            }
        }
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// Start the hub and serve the websocket/API surface until shutdown.
///
/// # Errors
///
/// Returns an error if the bind address is invalid, the listener cannot be bound,
/// or the server fails.
#[tracing::instrument(skip_all)]
pub async fn start(
    config: &DashboardConfig,
    port_override: Option<u16>,
    bind_override: Option<&str>,
) -> eyre::Result<()> {
    let listen_port = port_override.unwrap_or(config.server.port);
    let bind = bind_override.unwrap_or(&config.server.bind);
    let listen_ip: IpAddr = bind
        .parse()
        .wrap_err(format!("Invalid bind address: {bind}"))?;
    let addr = SocketAddr::from((listen_ip, listen_port));

    let app_state = AppState::from_config(config).await?;
    app_state.hub.connect();

    let listener = TcpListener::bind(addr)
        .await
        .wrap_err(format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);

    let hub = app_state.hub.clone();
    axum::serve(listener, http::router(app_state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("HTTP server failed")?;

    hub.disconnect();
    info!("Shut down");
    Ok(())
}

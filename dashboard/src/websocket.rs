use alloc::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{Instrument as _, debug, info, warn};

use fleetpulse_common::{
    AlertEvent, Command, ConnectionState, DeviceSnapshot, SystemAnalyticsSnapshot,
};

use crate::{
    app::AppState,
    dispatch::{CommandDispatcher, DispatchState, GuardRejection, SendOutcome},
    hub::HubEvent,
};

/// Messages sent from the server to web clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WsMessage {
    /// Send the entire state in the beginning to bootstrap the web client UI.
    Initial {
        connection: ConnectionState,
        devices: Vec<DeviceSnapshot>,
        alerts: Vec<AlertEvent>,
        analytics: Option<SystemAnalyticsSnapshot>,
    },
    Connected,
    Disconnected,
    DeviceUpdate(DeviceSnapshot),
    SystemAnalytics(SystemAnalyticsSnapshot),
    DeviceAlert(AlertEvent),
    /// State changes of this connection's command dispatcher.
    CommandState(DispatchState),
    /// A command this connection sent was refused before reaching the device.
    CommandRejected(GuardRejection),
}

impl From<HubEvent> for WsMessage {
    fn from(event: HubEvent) -> Self {
        match event {
            HubEvent::Connected => Self::Connected,
            HubEvent::Disconnected => Self::Disconnected,
            HubEvent::DeviceUpdate(snapshot) => Self::DeviceUpdate(snapshot),
            HubEvent::SystemAnalytics(analytics) => Self::SystemAnalytics(analytics),
            HubEvent::DeviceAlert(alert) => Self::DeviceAlert(alert),
        }
    }
}

/// Messages web clients may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    SendCommand(Command),
    /// The client has shown the last command result.
    Acknowledge,
}

/// Gets called for every new web client and spins up an event loop
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| start_webui_ws_loop(socket, state).in_current_span())
}

async fn send_ws_message(socket: &mut WebSocket, msg: &WsMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!("Failed to serialize websocket message: {}", e);
            Err(axum::Error::new(e))
        }
    }
}

fn initial_message(state: &AppState) -> WsMessage {
    state.view.read(|store| WsMessage::Initial {
        connection: state.hub.connection_state(),
        devices: store.snapshot_view(),
        alerts: store.alerts().cloned().collect(),
        analytics: store.analytics().cloned(),
    })
}

/// Handle one client message. Sends run in their own task so events keep flowing meanwhile.
fn handle_client_message(
    text: &str,
    dispatcher: &Arc<CommandDispatcher>,
    replies: &mpsc::UnboundedSender<WsMessage>,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::SendCommand(command)) => {
            let dispatcher = dispatcher.clone();
            let replies = replies.clone();
            tokio::spawn(
                async move {
                    if let SendOutcome::Rejected(rejection) = dispatcher.send(command).await {
                        drop(replies.send(WsMessage::CommandRejected(rejection)));
                    }
                }
                .in_current_span(),
            );
        }
        Ok(ClientMessage::Acknowledge) => {
            dispatcher.acknowledge();
        }
        Err(e) => warn!("Ignoring malformed client message: {}", e),
    }
}

/// We start one event loop per client
async fn start_webui_ws_loop(mut socket: WebSocket, state: AppState) {
    let mut events = state.ws_tx.subscribe();
    let dispatcher = Arc::new(CommandDispatcher::new(
        state.transport.clone(),
        state.status_lookup(),
    ));
    let mut command_state: watch::Receiver<DispatchState> = dispatcher.subscribe();
    let (replies_tx, mut replies_rx) = mpsc::unbounded_channel();

    if let Err(e) = send_ws_message(&mut socket, &initial_message(&state)).await {
        warn!("Failed to send initial state: {}", e);
        return;
    }
    debug!("Websocket client bootstrapped");

    loop {
        let outgoing = tokio::select! {
            msg = events.recv() => match msg {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Websocket client lagging, skipped events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Broadcast channel closed, stopping WebSocket handler");
                    break;
                }
            },
            Ok(()) = command_state.changed() => {
                WsMessage::CommandState(command_state.borrow_and_update().clone())
            }
            Some(reply) = replies_rx.recv() => reply,
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(text.as_str(), &dispatcher, &replies_tx);
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket connection closed");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket receive failed: {}", e);
                    break;
                }
            },
        };
        if let Err(e) = send_ws_message(&mut socket, &outgoing).await {
            warn!("Failed to send message, closing connection: {}", e);
            break;
        }
    }
}

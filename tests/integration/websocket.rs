//! Integration tests for websocket functionality

use core::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::{net::TcpStream, time};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use fleetpulse_common::Command;
use fleetpulse_dashboard::{
    ClientMessage, WsMessage,
    dispatch::{DispatchState, GuardRejection},
};

use crate::common::{KillOnDrop, get_free_port, spawn_dashboard_with_config, wait_for_listening};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Fast telemetry for a single, always-online device and no command latency.
async fn start_dashboard() -> (KillOnDrop, Socket) {
    let port = get_free_port();
    let guard = spawn_dashboard_with_config(
        port,
        &format!(
            r#"
        [server]
        port = {port}
        bind = "127.0.0.1"

        [telemetry]
        connect_delay_ms = 10
        device_interval_ms = 50
        analytics_interval_ms = 100
        alert_interval_ms = 100
        online_probability = 1.0
        devices = ["dev-001"]

        [fleet]
        command_latency_ms = 0
        "#
        ),
    );
    wait_for_listening(port, 5).await;

    let (socket, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
        .await
        .expect("failed to connect websocket");
    (guard, socket)
}

/// Read messages until one satisfies `pred`, or panic after a timeout.
async fn next_matching(socket: &mut Socket, pred: impl Fn(&WsMessage) -> bool) -> WsMessage {
    time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = socket.next().await {
            let msg = msg.unwrap();
            if !msg.is_text() {
                continue;
            }
            let ws_msg: WsMessage = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            if pred(&ws_msg) {
                return ws_msg;
            }
        }
        panic!("websocket closed before the expected message arrived");
    })
    .await
    .expect("timeout waiting for websocket message")
}

async fn send(socket: &mut Socket, msg: &ClientMessage) {
    let json = serde_json::to_string(msg).unwrap();
    socket.send(Message::Text(json.into())).await.unwrap();
}

#[tokio::test]
async fn websocket_bootstraps_then_streams_device_updates() {
    let (_guard, mut socket) = start_dashboard().await;

    let initial = next_matching(&mut socket, |_| true).await;
    assert!(
        matches!(initial, WsMessage::Initial { .. }),
        "first message must be Initial, got {initial:?}"
    );

    let update = next_matching(&mut socket, |msg| matches!(msg, WsMessage::DeviceUpdate(_))).await;
    let WsMessage::DeviceUpdate(snapshot) = update else {
        unreachable!("filtered above");
    };
    assert_eq!(snapshot.device_id, "dev-001");
    assert!(snapshot.is_online(), "online_probability is 1.0");
}

#[tokio::test]
async fn websocket_commands_are_guarded_and_settled() {
    let (_guard, mut socket) = start_dashboard().await;
    next_matching(&mut socket, |msg| matches!(msg, WsMessage::Initial { .. })).await;

    send(
        &mut socket,
        &ClientMessage::SendCommand(Command::new("dev-003", "REBOOT")),
    )
    .await;
    let rejected =
        next_matching(&mut socket, |msg| matches!(msg, WsMessage::CommandRejected(_))).await;
    assert_eq!(
        rejected,
        WsMessage::CommandRejected(GuardRejection::DeviceOffline("dev-003".to_string()))
    );

    send(
        &mut socket,
        &ClientMessage::SendCommand(Command::new("dev-001", "PING")),
    )
    .await;
    let settled = next_matching(&mut socket, |msg| {
        matches!(msg, WsMessage::CommandState(state) if state.is_terminal())
    })
    .await;
    let WsMessage::CommandState(DispatchState::Succeeded { message, .. }) = settled else {
        panic!("expected success, got {settled:?}");
    };
    assert_eq!(message, "Command \"PING\" sent to Water Tank Sensor A1");

    send(&mut socket, &ClientMessage::Acknowledge).await;
    next_matching(&mut socket, |msg| {
        *msg == WsMessage::CommandState(DispatchState::Idle)
    })
    .await;

    send(
        &mut socket,
        &ClientMessage::SendCommand(Command::new("dev-999", "PING")),
    )
    .await;
    let rejected =
        next_matching(&mut socket, |msg| matches!(msg, WsMessage::CommandRejected(_))).await;
    assert_eq!(
        rejected,
        WsMessage::CommandRejected(GuardRejection::UnknownDevice("dev-999".to_string()))
    );
}

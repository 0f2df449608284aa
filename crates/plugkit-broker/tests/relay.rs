//! End-to-end relay tests over real sockets.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use plugkit_broker::{start, BrokerConfig};
use plugkit_core::envelope::{decode, encode, Envelope};
use plugkit_core::{ControlMessage, Role};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a relay on an ephemeral port and leak the handle so the server
/// task outlives the test body.
async fn boot_port() -> u16 {
    let handle = start(BrokerConfig {
        port: 0,
        ..Default::default()
    })
    .await
    .unwrap();
    let port = handle.port;
    std::mem::forget(handle);
    port
}

async fn connect(port: u16, source: Option<&str>) -> WsStream {
    let url = match source {
        Some(role) => format!("ws://127.0.0.1:{port}/ws?source={role}"),
        None => format!("ws://127.0.0.1:{port}/ws"),
    };
    let (stream, _) = connect_async(&url).await.unwrap();
    stream
}

async fn recv_envelope(stream: &mut WsStream) -> Envelope {
    loop {
        let frame = timeout(TIMEOUT, stream.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return decode(text.as_str()).unwrap();
        }
    }
}

async fn send_envelope(stream: &mut WsStream, envelope: &Envelope) {
    stream
        .send(Message::Text(encode(envelope).into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn host_then_ui_sees_connect_event_and_snapshot() {
    let port = boot_port().await;

    let mut host = connect(port, None).await;
    let host_list = recv_envelope(&mut host).await;
    let Some(ControlMessage::ClientList { clients }) = ControlMessage::from_envelope(&host_list)
    else {
        panic!("expected client_list, got {host_list:?}");
    };
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].source, Role::Host);
    let host_id = clients[0].id.clone();

    let mut ui = connect(port, Some("plugin-window")).await;

    // The host is told about the newcomer, exactly once.
    let event = recv_envelope(&mut host).await;
    let Some(ControlMessage::ClientConnected { client }) = ControlMessage::from_envelope(&event)
    else {
        panic!("expected client_connected, got {event:?}");
    };
    assert_eq!(client.source, Role::PluginWindow);

    // The newcomer gets the full snapshot, host included.
    let ui_list = recv_envelope(&mut ui).await;
    let Some(ControlMessage::ClientList { clients }) = ControlMessage::from_envelope(&ui_list)
    else {
        panic!("expected client_list, got {ui_list:?}");
    };
    assert_eq!(clients.len(), 2);
    assert!(clients.iter().any(|c| c.id == host_id && c.source == Role::Host));
    assert!(clients.iter().any(|c| c.id == client.id && c.source == Role::PluginWindow));
}

#[tokio::test]
async fn frames_are_relayed_in_order_and_never_echoed() {
    let port = boot_port().await;

    let mut host = connect(port, None).await;
    recv_envelope(&mut host).await; // own client_list

    let mut ui = connect(port, Some("plugin-window")).await;
    recv_envelope(&mut host).await; // client_connected for ui
    recv_envelope(&mut ui).await; // own client_list

    for n in 0..5i64 {
        let env = Envelope::from_message(&serde_json::json!({"type": "tick", "n": n})).unwrap();
        send_envelope(&mut ui, &env).await;
    }

    for n in 0..5 {
        let received = recv_envelope(&mut host).await;
        let json = received.plugin_message.into_json();
        assert_eq!(json["type"], "tick");
        assert_eq!(json["n"], n, "relay reordered frames");
    }

    // The sender never hears its own frames back.
    let echo = timeout(Duration::from_millis(200), ui.next()).await;
    assert!(echo.is_err(), "broker echoed a frame to its sender: {echo:?}");
}

#[tokio::test]
async fn ping_is_answered_by_the_relay() {
    let port = boot_port().await;

    let mut host = connect(port, None).await;
    recv_envelope(&mut host).await;

    let mut ui = connect(port, Some("plugin-window")).await;
    recv_envelope(&mut host).await;
    recv_envelope(&mut ui).await;

    send_envelope(&mut ui, &ControlMessage::Ping.to_envelope()).await;

    let reply = recv_envelope(&mut ui).await;
    assert_eq!(ControlMessage::from_envelope(&reply), Some(ControlMessage::Pong));

    // Pings are answered, not relayed.
    let leaked = timeout(Duration::from_millis(200), host.next()).await;
    assert!(leaked.is_err(), "ping leaked to another client: {leaked:?}");
}

#[tokio::test]
async fn disconnect_is_broadcast_with_descriptor() {
    let port = boot_port().await;

    let mut host = connect(port, None).await;
    recv_envelope(&mut host).await;

    let mut ui = connect(port, Some("plugin-window")).await;
    let connected = recv_envelope(&mut host).await;
    let Some(ControlMessage::ClientConnected { client }) =
        ControlMessage::from_envelope(&connected)
    else {
        panic!("expected client_connected");
    };
    recv_envelope(&mut ui).await;

    ui.close(None).await.unwrap();

    let event = recv_envelope(&mut host).await;
    let Some(ControlMessage::ClientDisconnected { client: gone }) =
        ControlMessage::from_envelope(&event)
    else {
        panic!("expected client_disconnected, got {event:?}");
    };
    assert_eq!(gone.id, client.id);
    assert_eq!(gone.source, Role::PluginWindow);
}

#[tokio::test]
async fn binary_payloads_survive_the_relay() {
    let port = boot_port().await;

    let mut host = connect(port, None).await;
    recv_envelope(&mut host).await;

    let mut ui = connect(port, Some("browser")).await;
    recv_envelope(&mut host).await;
    recv_envelope(&mut ui).await;

    let bytes: Vec<u8> = (0..=255).collect();
    let env = Envelope::new(plugkit_core::PluginValue::from(bytes.clone()));
    send_envelope(&mut ui, &env).await;

    let received = recv_envelope(&mut host).await;
    assert_eq!(received.plugin_message, plugkit_core::PluginValue::Bytes(bytes));
}

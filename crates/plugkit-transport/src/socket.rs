use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use plugkit_core::{DevConfig, Role};

use crate::errors::TransportError;

/// Where and how persistently to dial the relay.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    pub url: String,
    /// First reconnect delay; doubles on every failed attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff. Reset on a successful open.
    pub max_backoff: Duration,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }

    /// Relay URL for a role, from the CLI handoff config. The host dials
    /// without a source tag.
    pub fn for_role(config: &DevConfig, role: Role) -> Self {
        let port = config.socket_port();
        let url = match role {
            Role::Host => format!("ws://localhost:{port}/ws"),
            role => format!("ws://localhost:{port}/ws?source={role}"),
        };
        Self::new(url)
    }
}

/// Lifecycle and traffic notifications from the socket task.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Closed,
}

/// Cheap-to-clone handle to the background connection loop. The loop owns
/// reconnection and backoff; layers above own queue-and-flush.
#[derive(Clone)]
pub struct ReconnectingSocket {
    outbound: mpsc::UnboundedSender<String>,
    task: Arc<tokio::task::JoinHandle<()>>,
}

impl ReconnectingSocket {
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Disconnected)
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

/// Spawn the connection loop. Events arrive on the returned receiver.
pub fn connect(config: SocketConfig) -> (ReconnectingSocket, mpsc::UnboundedReceiver<SocketEvent>) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(config, out_rx, event_tx));
    (
        ReconnectingSocket {
            outbound: out_tx,
            task: Arc::new(task),
        },
        event_rx,
    )
}

async fn run(
    config: SocketConfig,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
) {
    let mut backoff = config.initial_backoff;
    loop {
        match connect_async(config.url.as_str()).await {
            Ok((stream, _)) => {
                backoff = config.initial_backoff;
                if event_tx.send(SocketEvent::Open).is_err() {
                    return;
                }
                let (mut sink, mut frames) = stream.split();
                loop {
                    tokio::select! {
                        outgoing = out_rx.recv() => match outgoing {
                            Some(text) => {
                                if sink.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            // Every handle dropped; nothing left to do.
                            None => return,
                        },
                        frame = frames.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let _ = event_tx.send(SocketEvent::Message(text.to_string()));
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                    }
                }
                if event_tx.send(SocketEvent::Closed).is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::debug!(url = %config.url, error = %err, "relay connect failed");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_backoff);
    }
}

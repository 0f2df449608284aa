use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use plugkit_core::envelope;
use plugkit_core::{ClientDescriptor, ClientId, ControlMessage, Role};

use crate::registry::ClientRegistry;

/// Relay configuration. `port` is the dev-server base port; the socket
/// binds one above it (0 asks the OS for an ephemeral port).
pub struct BrokerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_send_queue: 256,
        }
    }
}

impl BrokerConfig {
    pub fn socket_port(&self) -> u16 {
        if self.port == 0 {
            0
        } else {
            self.port + 1
        }
    }
}

/// Shared state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
}

/// Build the relay router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/clients", get(clients_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Start the relay. The returned handle keeps the server task alive.
pub async fn start(config: BrokerConfig) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let router = build_router(AppState {
        registry: Arc::clone(&registry),
    });

    let addr = format!("127.0.0.1:{}", config.socket_port());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "relay listening");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        _server: server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<ClientRegistry>,
    _server: tokio::task::JoinHandle<()>,
}

#[derive(Deserialize)]
struct ConnectParams {
    source: Option<Role>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // The sandboxed host connects without a source tag.
    let role = params.source.unwrap_or(Role::Host);
    ws.on_upgrade(move |socket| handle_socket(socket, role, state))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "clients": state.registry.count(),
    }))
}

async fn clients_handler(State(state): State<AppState>) -> axum::Json<Vec<ClientDescriptor>> {
    axum::Json(state.registry.descriptors())
}

/// Connection lifecycle: announce the newcomer to everyone else, send the
/// membership snapshot to the newcomer only, then relay until close.
async fn handle_socket(socket: WebSocket, role: Role, state: AppState) {
    let registry = state.registry;
    let (client_id, rx) = registry.register(role);
    tracing::info!(client_id = %client_id, role = %role, "client connected");

    let connected = ControlMessage::ClientConnected {
        client: ClientDescriptor {
            id: client_id.clone(),
            source: role,
        },
    };
    registry.broadcast_except(&client_id, &envelope::encode(&connected.to_envelope()));

    let list = ControlMessage::ClientList {
        clients: registry.descriptors(),
    };
    registry.send_to(&client_id, envelope::encode(&list.to_envelope()));

    run_connection(socket, client_id.clone(), rx, Arc::clone(&registry)).await;

    // Errors and abrupt drops land here too; teardown is identical.
    if let Some(descriptor) = registry.unregister(&client_id) {
        tracing::info!(client_id = %client_id, role = %role, "client disconnected");
        let disconnected = ControlMessage::ClientDisconnected { client: descriptor };
        registry.broadcast_except(&client_id, &envelope::encode(&disconnected.to_envelope()));
    }
}

/// Split the socket into a writer draining the registry queue and a reader
/// feeding the relay. Either side ending tears the connection down.
async fn run_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let reader_id = client_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            match frame {
                WsMessage::Text(text) => handle_frame(&registry, &reader_id, text.as_str()),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }
}

fn handle_frame(registry: &ClientRegistry, client_id: &ClientId, text: &str) {
    let env = match envelope::decode(text) {
        Ok(env) => env,
        Err(err) => {
            tracing::debug!(client_id = %client_id, error = %err, "dropping malformed envelope");
            return;
        }
    };

    // Keepalive pings are answered here, never relayed.
    if let Some(ControlMessage::Ping) = ControlMessage::from_envelope(&env) {
        registry.send_to(client_id, envelope::encode(&ControlMessage::Pong.to_envelope()));
        return;
    }

    registry.broadcast_except(client_id, text);
}

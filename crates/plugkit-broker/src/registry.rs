use dashmap::DashMap;
use tokio::sync::mpsc;

use plugkit_core::{ClientDescriptor, ClientId, Role};

/// A participant currently connected to the relay. Immutable once
/// registered; the writer task drains the paired receiver.
pub struct ConnectedClient {
    pub id: ClientId,
    pub role: Role,
    tx: mpsc::Sender<String>,
}

/// Registry of connected relay clients, keyed by broker-minted id.
///
/// The registry is the sole owner of live clients; connection handlers refer
/// to entries by id only, so there are no client↔registry cycles to manage.
pub struct ClientRegistry {
    clients: DashMap<ClientId, ConnectedClient>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Mint an id for a new connection and register it under the declared
    /// role. Returns the id and the receiver its writer task drains.
    pub fn register(&self, role: Role) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(
            id.clone(),
            ConnectedClient {
                id: id.clone(),
                role,
                tx,
            },
        );
        (id, rx)
    }

    /// Remove a client, returning its descriptor for the disconnect
    /// broadcast.
    pub fn unregister(&self, id: &ClientId) -> Option<ClientDescriptor> {
        self.clients.remove(id).map(|(_, client)| ClientDescriptor {
            id: client.id,
            source: client.role,
        })
    }

    /// Send a frame to one client. Frames to a full queue are dropped
    /// with a warning rather than blocking the relay.
    pub fn send_to(&self, id: &ClientId, text: String) -> bool {
        let Some(client) = self.clients.get(id) else {
            return false;
        };
        match client.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Relay a frame to every client except the originator.
    pub fn broadcast_except(&self, except: &ClientId, text: &str) {
        for entry in self.clients.iter() {
            if entry.key() == except {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) =
                entry.value().tx.try_send(text.to_owned())
            {
                tracing::warn!(client_id = %entry.key(), "send queue full, dropping frame");
            }
        }
    }

    /// Snapshot of all connected clients.
    pub fn descriptors(&self) -> Vec<ClientDescriptor> {
        self.clients
            .iter()
            .map(|entry| ClientDescriptor {
                id: entry.value().id.clone(),
                source: entry.value().role,
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }
}

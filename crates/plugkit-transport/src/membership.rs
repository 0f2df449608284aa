use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use plugkit_core::{ClientDescriptor, ClientId, ControlMessage, Role};

use crate::client::{TransportClient, Via};

#[derive(Clone, Debug)]
pub struct MembershipConfig {
    /// Grace window before committing a plugin-window disappearance.
    /// A reconnect inside the window cancels the removal.
    pub grace: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(200),
        }
    }
}

struct PendingRemoval {
    id: ClientId,
    generation: u64,
}

struct Inner {
    members: Mutex<HashMap<ClientId, Role>>,
    pending: Mutex<Option<PendingRemoval>>,
    generation: AtomicU64,
    grace: Duration,
    changes: watch::Sender<Vec<ClientDescriptor>>,
}

/// Membership view over relay events, as observed by one transport client.
///
/// The plugin window's socket legitimately flaps during a host reload, so
/// its removal is debounced; other roles drop out immediately. Each tracker
/// owns its state — independent trackers coexist in one process.
#[derive(Clone)]
pub struct MembershipTracker {
    inner: Arc<Inner>,
}

impl MembershipTracker {
    pub fn new(config: MembershipConfig) -> Self {
        let (changes, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                members: Mutex::new(HashMap::new()),
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
                grace: config.grace,
                changes,
            }),
        }
    }

    /// Feed one relay control message into the view.
    pub fn apply(&self, message: &ControlMessage) {
        match message {
            ControlMessage::ClientList { clients } => {
                {
                    let mut members = self.inner.members.lock();
                    members.clear();
                    for client in clients {
                        members.insert(client.id.clone(), client.source);
                    }
                }
                // A fresh snapshot supersedes any in-flight removal.
                *self.inner.pending.lock() = None;
                self.notify();
            }
            ControlMessage::ClientConnected { client } => {
                if client.source == Role::PluginWindow {
                    // The window came back: drop the flapped connection now
                    // and cancel its pending removal.
                    if let Some(previous) = self.inner.pending.lock().take() {
                        self.inner.members.lock().remove(&previous.id);
                    }
                }
                self.inner
                    .members
                    .lock()
                    .insert(client.id.clone(), client.source);
                self.notify();
            }
            ControlMessage::ClientDisconnected { client } => {
                if client.source == Role::PluginWindow {
                    self.schedule_removal(client.id.clone());
                } else {
                    self.inner.members.lock().remove(&client.id);
                    self.notify();
                }
            }
            ControlMessage::Ping | ControlMessage::Pong => {}
        }
    }

    /// Current view, ordered by client id.
    pub fn snapshot(&self) -> Vec<ClientDescriptor> {
        let members = self.inner.members.lock();
        let mut descriptors: Vec<ClientDescriptor> = members
            .iter()
            .map(|(id, role)| ClientDescriptor {
                id: id.clone(),
                source: *role,
            })
            .collect();
        descriptors.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        descriptors
    }

    pub fn contains_role(&self, role: Role) -> bool {
        self.inner.members.lock().values().any(|r| *r == role)
    }

    /// Watch the view; receivers get a fresh snapshot on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<ClientDescriptor>> {
        self.inner.changes.subscribe()
    }

    /// Feed this tracker from a transport client's socket traffic.
    pub fn attach(&self, client: &TransportClient) {
        let tracker = self.clone();
        client.on(&[Via::Socket], move |envelope| {
            if let Some(message) = ControlMessage::from_envelope(envelope) {
                tracker.apply(&message);
            }
        });
    }

    fn schedule_removal(&self, id: ClientId) {
        let mut pending = self.inner.pending.lock();
        if pending.is_some() {
            // A grace timer is already running.
            return;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *pending = Some(PendingRemoval { id, generation });
        drop(pending);

        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tracker.inner.grace).await;
            tracker.commit_removal(generation);
        });
    }

    fn commit_removal(&self, generation: u64) {
        let removed = {
            let mut pending = self.inner.pending.lock();
            let current = pending
                .as_ref()
                .map_or(false, |p| p.generation == generation);
            if current {
                pending.take().map(|p| p.id)
            } else {
                None // cancelled by a reconnect or a fresh snapshot
            }
        };
        if let Some(id) = removed {
            self.inner.members.lock().remove(&id);
            self.notify();
        }
    }

    fn notify(&self) {
        let _ = self.inner.changes.send(self.snapshot());
    }
}

impl Default for MembershipTracker {
    fn default() -> Self {
        Self::new(MembershipConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, role: Role) -> ClientDescriptor {
        ClientDescriptor {
            id: ClientId::from_raw(id),
            source: role,
        }
    }

    fn connected(id: &str, role: Role) -> ControlMessage {
        ControlMessage::ClientConnected {
            client: descriptor(id, role),
        }
    }

    fn disconnected(id: &str, role: Role) -> ControlMessage {
        ControlMessage::ClientDisconnected {
            client: descriptor(id, role),
        }
    }

    #[tokio::test]
    async fn snapshot_rebuilds_from_client_list() {
        let tracker = MembershipTracker::default();
        tracker.apply(&ControlMessage::ClientList {
            clients: vec![
                descriptor("client_a", Role::Host),
                descriptor("client_b", Role::PluginWindow),
            ],
        });

        let view = tracker.snapshot();
        assert_eq!(view.len(), 2);
        assert!(tracker.contains_role(Role::Host));
        assert!(tracker.contains_role(Role::PluginWindow));
    }

    #[tokio::test]
    async fn non_window_roles_drop_immediately() {
        let tracker = MembershipTracker::default();
        tracker.apply(&connected("client_h", Role::Host));
        tracker.apply(&disconnected("client_h", Role::Host));
        assert!(tracker.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn window_flap_never_shows_a_gap() {
        let tracker = MembershipTracker::default();
        tracker.apply(&connected("client_w1", Role::PluginWindow));
        tracker.apply(&disconnected("client_w1", Role::PluginWindow));

        // Inside the grace window the member is still visible.
        assert!(tracker.contains_role(Role::PluginWindow));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tracker.apply(&connected("client_w2", Role::PluginWindow));

        // The reconnect replaced the flapped id without a visible gap.
        let view = tracker.snapshot();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id.as_str(), "client_w2");

        // The cancelled timer must not fire later.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(tracker.contains_role(Role::PluginWindow));
    }

    #[tokio::test(start_paused = true)]
    async fn window_removal_commits_after_the_grace_window() {
        let tracker = MembershipTracker::default();
        tracker.apply(&connected("client_w", Role::PluginWindow));
        tracker.apply(&disconnected("client_w", Role::PluginWindow));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!tracker.contains_role(Role::PluginWindow));
    }

    #[tokio::test(start_paused = true)]
    async fn configurable_grace_is_respected() {
        let tracker = MembershipTracker::new(MembershipConfig {
            grace: Duration::from_millis(50),
        });
        tracker.apply(&connected("client_w", Role::PluginWindow));
        tracker.apply(&disconnected("client_w", Role::PluginWindow));

        tokio::time::sleep(Duration::from_millis(75)).await;
        assert!(tracker.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_snapshot_cancels_a_pending_removal() {
        let tracker = MembershipTracker::default();
        tracker.apply(&connected("client_w", Role::PluginWindow));
        tracker.apply(&disconnected("client_w", Role::PluginWindow));

        tracker.apply(&ControlMessage::ClientList {
            clients: vec![descriptor("client_w", Role::PluginWindow)],
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(tracker.contains_role(Role::PluginWindow));
    }

    #[tokio::test]
    async fn watchers_observe_changes() {
        let tracker = MembershipTracker::default();
        let mut rx = tracker.subscribe();

        tracker.apply(&connected("client_a", Role::Browser));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);

        tracker.apply(&disconnected("client_a", Role::Browser));
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_empty());
    }

    #[tokio::test]
    async fn independent_trackers_do_not_share_state() {
        let a = MembershipTracker::default();
        let b = MembershipTracker::default();
        a.apply(&connected("client_a", Role::Host));

        assert_eq!(a.snapshot().len(), 1);
        assert!(b.snapshot().is_empty());
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use plugkit_core::envelope::{self, Envelope};
use plugkit_core::{ControlMessage, PluginValue};

use crate::socket::{self, ReconnectingSocket, SocketConfig, SocketEvent};

/// Delivery legs a logical send may take. Local legs go through bound
/// [`MessagePort`]s; `Socket` goes through the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Via {
    Window,
    Parent,
    Iframe,
    Socket,
}

/// Which execution context this client runs in. Only the top-level browser
/// document rewrites its own-window leg onto the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextKind {
    /// The sandboxed plugin main thread.
    Host,
    /// The plugin UI inside the host's window.
    PluginWindow,
    /// A standalone top-level browser document.
    Browser,
}

/// Outbound half of a local messaging primitive (the host's privileged
/// postMessage analog). Supplied by the embedding context; inbound frames
/// are injected via [`TransportClient::deliver_local`].
pub trait MessagePort: Send + Sync {
    fn post(&self, envelope: &Envelope);
}

pub struct TransportOptions {
    pub context: ContextKind,
    /// Interval between keepalive pings while the socket is open.
    pub keepalive_interval: Duration,
}

impl TransportOptions {
    pub fn new(context: ContextKind) -> Self {
        Self {
            context,
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;
type LifecycleHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    open: bool,
    pending: VecDeque<String>,
    listeners: HashMap<Via, Vec<Listener>>,
    ports: HashMap<Via, Arc<dyn MessagePort>>,
    open_hooks: Vec<LifecycleHook>,
    close_hooks: Vec<LifecycleHook>,
}

/// Per-context message router: posts over any combination of vias, queues
/// socket traffic while disconnected, and flushes the queue in order
/// exactly once per open.
pub struct TransportClient {
    inner: Arc<Mutex<Inner>>,
    socket: ReconnectingSocket,
    context: ContextKind,
    keepalive: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    driver: tokio::task::JoinHandle<()>,
}

impl TransportClient {
    /// Dial the relay and start the event driver.
    pub fn connect(socket_config: SocketConfig, options: TransportOptions) -> Self {
        let (socket, events) = socket::connect(socket_config);
        let inner: Arc<Mutex<Inner>> = Arc::new(Mutex::new(Inner::default()));
        let keepalive = Arc::new(Mutex::new(None));

        let driver = tokio::spawn(drive(
            events,
            Arc::clone(&inner),
            socket.clone(),
            options.keepalive_interval,
            Arc::clone(&keepalive),
        ));

        Self {
            inner,
            socket,
            context: options.context,
            keepalive,
            driver,
        }
    }

    /// Attach the outbound half of a local leg. `Socket` is not a port.
    pub fn bind_port(&self, via: Via, port: Arc<dyn MessagePort>) {
        if via == Via::Socket {
            tracing::warn!("ignoring attempt to bind a port for the socket via");
            return;
        }
        self.inner.lock().ports.insert(via, port);
    }

    /// Post each payload over every requested via. A send may take a fast
    /// local leg and mirror over the socket when the receiver's liveness
    /// is uncertain.
    pub fn post(&self, messages: Vec<PluginValue>, vias: &[Via]) {
        for payload in messages {
            self.post_envelope(&Envelope::new(payload), vias);
        }
    }

    fn post_envelope(&self, envelope: &Envelope, vias: &[Via]) {
        let mut resolved: Vec<Via> = Vec::with_capacity(vias.len());
        for &via in vias {
            // A top-level document posting to its own window would deliver
            // the message back to itself; that leg exits over the socket.
            let via = if via == Via::Window && self.context == ContextKind::Browser {
                Via::Socket
            } else {
                via
            };
            if !resolved.contains(&via) {
                resolved.push(via);
            }
        }

        for via in resolved {
            match via {
                Via::Socket => self.post_socket(envelope),
                local => {
                    let port = self.inner.lock().ports.get(&local).cloned();
                    match port {
                        Some(port) => port.post(envelope),
                        None => tracing::debug!(via = ?local, "no port bound for via"),
                    }
                }
            }
        }
    }

    fn post_socket(&self, envelope: &Envelope) {
        let text = envelope::encode(envelope);
        let mut guard = self.inner.lock();
        if guard.open {
            drop(guard);
            if self.socket.send(text.clone()).is_err() {
                self.inner.lock().pending.push_back(text);
            }
        } else {
            guard.pending.push_back(text);
        }
    }

    /// Register a listener on one or more vias. Socket listeners receive
    /// already-decoded envelopes.
    pub fn on(&self, vias: &[Via], callback: impl Fn(&Envelope) + Send + Sync + 'static) {
        let listener: Listener = Arc::new(callback);
        let mut guard = self.inner.lock();
        for &via in vias {
            guard.listeners.entry(via).or_default().push(Arc::clone(&listener));
        }
    }

    /// Run `callback` on every socket open. Registering while already open
    /// fires immediately, so there is no missed-event window.
    pub fn on_open(&self, callback: impl Fn() + Send + Sync + 'static) {
        let hook: LifecycleHook = Arc::new(callback);
        let fire_now = {
            let mut guard = self.inner.lock();
            guard.open_hooks.push(Arc::clone(&hook));
            guard.open
        };
        if fire_now {
            hook();
        }
    }

    /// Run `callback` on every socket close.
    pub fn on_close(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.lock().close_hooks.push(Arc::new(callback));
    }

    /// Inject a frame received on a local leg. Peers probe liveness over
    /// local legs too, so pings are answered on the same leg.
    pub fn deliver_local(&self, via: Via, envelope: &Envelope) {
        if ControlMessage::from_envelope(envelope) == Some(ControlMessage::Ping) {
            let port = self.inner.lock().ports.get(&via).cloned();
            if let Some(port) = port {
                port.post(&ControlMessage::Pong.to_envelope());
            }
        }
        dispatch(&self.inner, via, envelope);
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Stop the driver, keepalive, and connection loop.
    pub fn shutdown(&self) {
        self.driver.abort();
        if let Some(ticker) = self.keepalive.lock().take() {
            ticker.abort();
        }
        self.socket.shutdown();
    }
}

async fn drive(
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
    inner: Arc<Mutex<Inner>>,
    socket: ReconnectingSocket,
    keepalive_interval: Duration,
    keepalive: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Open => {
                let (hooks, queued) = {
                    let mut guard = inner.lock();
                    guard.open = true;
                    let queued: Vec<String> = guard.pending.drain(..).collect();
                    (guard.open_hooks.clone(), queued)
                };
                for hook in hooks {
                    hook();
                }
                // Flush in enqueue order, exactly once.
                for text in queued {
                    if socket.send(text).is_err() {
                        break;
                    }
                }
                let ticker_socket = socket.clone();
                let ticker = tokio::spawn(async move {
                    let mut interval = tokio::time::interval(keepalive_interval);
                    interval.tick().await; // consume first immediate tick
                    loop {
                        interval.tick().await;
                        let ping = envelope::encode(&ControlMessage::Ping.to_envelope());
                        if ticker_socket.send(ping).is_err() {
                            break;
                        }
                    }
                });
                if let Some(previous) = keepalive.lock().replace(ticker) {
                    previous.abort();
                }
            }
            SocketEvent::Message(text) => {
                let env = match envelope::decode(&text) {
                    Ok(env) => env,
                    Err(err) => {
                        tracing::debug!(error = %err, "dropping malformed envelope");
                        continue;
                    }
                };
                // Liveness is bidirectional; either side may be the prober.
                if ControlMessage::from_envelope(&env) == Some(ControlMessage::Ping) {
                    let _ = socket.send(envelope::encode(&ControlMessage::Pong.to_envelope()));
                }
                dispatch(&inner, Via::Socket, &env);
            }
            SocketEvent::Closed => {
                let hooks = {
                    let mut guard = inner.lock();
                    guard.open = false;
                    guard.close_hooks.clone()
                };
                if let Some(ticker) = keepalive.lock().take() {
                    ticker.abort();
                }
                for hook in hooks {
                    hook();
                }
            }
        }
    }
}

/// Dispatch outside the lock so listeners may call back into the client.
fn dispatch(inner: &Arc<Mutex<Inner>>, via: Via, envelope: &Envelope) {
    let listeners = inner.lock().listeners.get(&via).cloned().unwrap_or_default();
    for listener in listeners {
        listener(envelope);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, PluginValue};
use crate::ids::ClientId;

/// Logical participant in the dev-time relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// The sandboxed, privileged plugin main thread.
    Host,
    /// The plugin UI running in the host's window.
    PluginWindow,
    /// A standalone browser tab previewing the UI.
    Browser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::PluginWindow => "plugin-window",
            Self::Browser => "browser",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized view of a connected client. The broker owns the live client;
/// everyone else sees only this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub id: ClientId,
    pub source: Role,
}

/// Relay bookkeeping messages carried inside `pluginMessage`.
///
/// Connect/disconnect events always carry the full `{id, source}` descriptor;
/// the bare-id shape some older clients emitted is not supported.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlMessage {
    Ping,
    Pong,
    ClientList { clients: Vec<ClientDescriptor> },
    ClientConnected { client: ClientDescriptor },
    ClientDisconnected { client: ClientDescriptor },
}

impl ControlMessage {
    /// Wrap this control message as a relay envelope.
    pub fn to_envelope(&self) -> Envelope {
        // A closed enum of plain fields serializes to JSON unconditionally.
        let json = serde_json::to_value(self).expect("control message serialization is infallible");
        Envelope::new(PluginValue::from(json))
    }

    /// Interpret an envelope's payload as a control message, if it is one.
    /// Application payloads simply return `None`.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let fields = envelope.plugin_message.as_object()?;
        fields.get("event")?;
        serde_json::from_value(envelope.plugin_message.clone().into_json()).ok()
    }
}

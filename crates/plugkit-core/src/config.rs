use serde::{Deserialize, Serialize};

/// Which dev-time surface the plugin author launched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevCommand {
    /// Live-reload development inside the host.
    Dev,
    /// Standalone browser preview of the UI.
    Preview,
}

/// Handoff object from the scaffolding CLI. The relay and the transport
/// clients consume it; they never produce it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DevConfig {
    /// Base port of the plugin dev server.
    pub port: u16,
    /// Verbose wire logging.
    #[serde(default)]
    pub debug: bool,
    pub command: DevCommand,
}

impl DevConfig {
    /// The relay listens one above the dev-server port. A base port of 0
    /// asks the OS for an ephemeral port (used by tests).
    pub fn socket_port(&self) -> u16 {
        if self.port == 0 {
            0
        } else {
            self.port + 1
        }
    }
}

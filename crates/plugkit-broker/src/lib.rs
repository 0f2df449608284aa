pub mod registry;
pub mod server;

pub use registry::ClientRegistry;
pub use server::{start, AppState, BrokerConfig, ServerHandle};

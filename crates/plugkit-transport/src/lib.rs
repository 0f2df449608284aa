pub mod client;
pub mod errors;
pub mod membership;
pub mod socket;

pub use client::{ContextKind, MessagePort, TransportClient, TransportOptions, Via};
pub use errors::TransportError;
pub use membership::{MembershipConfig, MembershipTracker};
pub use socket::{ReconnectingSocket, SocketConfig, SocketEvent};

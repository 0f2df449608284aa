/// Transport-level failures. Recovered locally by queueing and
/// reconnection; business logic never sees them unless it asked to close.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket task is no longer running")]
    Disconnected,
}

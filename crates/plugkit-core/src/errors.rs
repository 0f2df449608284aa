/// Malformed envelope text. Recoverable: callers log at debug level and
/// drop the message; the connection stays alive.
#[derive(Debug, thiserror::Error)]
#[error("malformed envelope: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

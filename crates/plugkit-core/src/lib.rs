pub mod config;
pub mod control;
pub mod envelope;
pub mod errors;
pub mod ids;

pub use config::{DevCommand, DevConfig};
pub use control::{ClientDescriptor, ControlMessage, Role};
pub use envelope::{decode, encode, Envelope, PluginValue};
pub use errors::DecodeError;
pub use ids::{ClientId, TestRunId};

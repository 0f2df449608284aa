pub mod errors;
pub mod host;
pub mod protocol;
pub mod recorder;
pub mod registry;
pub mod runner;

pub use errors::BridgeError;
pub use host::{ClosureLoader, FragmentLoader, HostRunner, TestContext, TestFn};
pub use protocol::{BridgeMessage, ErrorDetail};
pub use recorder::{AssertionLog, Chain};
pub use registry::TestRegistry;
pub use runner::{BridgeSender, RunStatus, RunnerConfig, TestRun, TestRunner};

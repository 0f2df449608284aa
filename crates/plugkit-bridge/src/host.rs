use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;

use plugkit_core::{PluginValue, TestRunId};

use crate::errors::BridgeError;
use crate::protocol::{self, BridgeMessage, ErrorDetail};
use crate::recorder::AssertionLog;
use crate::registry::TestRegistry;

/// Host-side state handed to an executing test body.
#[derive(Default)]
pub struct TestContext {
    /// Plugin state snapshot attached to failure reports.
    pub plugin_state: Option<PluginValue>,
}

/// A loaded test body: records assertions through the log, may return a
/// value, and reports failures as normalized error details.
pub type TestFn = Arc<
    dyn Fn(&mut TestContext, &AssertionLog) -> Result<Option<PluginValue>, ErrorDetail>
        + Send
        + Sync,
>;

/// Capability for turning fragment source shipped at message time into
/// something callable inside the sandbox. The contract for the source is
/// a textual function body over named parameters `context` and `expect`;
/// how it becomes executable is the embedding sandbox's business, so
/// bridge logic is not hardwired to any concrete runtime.
pub trait FragmentLoader: Send + Sync {
    fn load(&self, source: &str) -> Result<TestFn, BridgeError>;
}

/// Loader backed by a table of fragments compiled ahead of time, keyed by
/// source text. The lookup at run time is the capability boundary.
#[derive(Default)]
pub struct ClosureLoader {
    fragments: DashMap<String, TestFn>,
}

impl ClosureLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(
        &self,
        source: &str,
        body: impl Fn(&mut TestContext, &AssertionLog) -> Result<Option<PluginValue>, ErrorDetail>
            + Send
            + Sync
            + 'static,
    ) {
        self.fragments.insert(source.to_owned(), Arc::new(body));
    }
}

impl FragmentLoader for ClosureLoader {
    fn load(&self, source: &str) -> Result<TestFn, BridgeError> {
        self.fragments
            .get(source)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                BridgeError::Load(format!(
                    "no fragment provided for source ({} bytes)",
                    source.len()
                ))
            })
    }
}

/// Sandbox-side half of the bridge: registers fragments, executes runs
/// with a fresh context and a recording expect, and answers each run with
/// exactly one of `TEST_ASSERTIONS` or `TEST_ERROR`.
pub struct HostRunner {
    registry: TestRegistry,
    loader: Arc<dyn FragmentLoader>,
    cancelled: DashMap<TestRunId, ()>,
}

impl HostRunner {
    pub fn new(loader: Arc<dyn FragmentLoader>) -> Self {
        Self {
            registry: TestRegistry::new(),
            loader,
            cancelled: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    /// Process one bridge message, returning the response to send back if
    /// this message demands one.
    pub fn handle(&self, message: BridgeMessage) -> Result<Option<BridgeMessage>, BridgeError> {
        match message {
            BridgeMessage::RegisterTest {
                test_name,
                fn_string,
            } => {
                self.registry.register(&test_name, &fn_string)?;
                Ok(None)
            }
            BridgeMessage::RunTest {
                test_name,
                test_run_id,
                test_fn,
            } => Ok(self.run(&test_name, test_run_id, test_fn)),
            BridgeMessage::CancelTest {
                test_run_id,
                reason,
            } => {
                tracing::debug!(run_id = %test_run_id, reason = %reason, "test run cancelled");
                self.cancelled.insert(test_run_id, ());
                Ok(None)
            }
            // Responses travel the other way; nothing to do here.
            BridgeMessage::TestAssertions { .. } | BridgeMessage::TestError { .. } => Ok(None),
        }
    }

    fn run(
        &self,
        test_name: &str,
        run_id: TestRunId,
        inline: Option<String>,
    ) -> Option<BridgeMessage> {
        // A cancel that raced ahead of the run suppresses it entirely.
        if self.cancelled.remove(&run_id).is_some() {
            tracing::debug!(run_id = %run_id, "skipping cancelled run");
            return None;
        }

        let Some(source) = inline.or_else(|| self.registry.source(test_name)) else {
            let message = format!("unknown test: {test_name}");
            return Some(BridgeMessage::TestError {
                test_run_id: run_id,
                error: message.clone(),
                plugin_state: None,
                original_error: Some(ErrorDetail::new("Error", message)),
            });
        };

        let body = match self.loader.load(&source) {
            Ok(body) => body,
            Err(err) => {
                return Some(BridgeMessage::TestError {
                    test_run_id: run_id,
                    error: err.to_string(),
                    plugin_state: None,
                    original_error: Some(ErrorDetail::new("Error", err.to_string())),
                });
            }
        };

        let log = AssertionLog::new();
        let mut context = TestContext::default();
        let outcome = catch_unwind(AssertUnwindSafe(|| body(&mut context, &log)));

        // Cooperative cancellation: a synchronous body cannot be stopped,
        // but a cancelled run must not produce a response.
        if self.cancelled.remove(&run_id).is_some() {
            tracing::debug!(run_id = %run_id, "dropping response for cancelled run");
            return None;
        }

        match outcome {
            Ok(Ok(return_value)) => Some(BridgeMessage::TestAssertions {
                test_run_id: run_id,
                assertion_code: protocol::join_assertions(&log.take()),
                return_value,
            }),
            Ok(Err(detail)) => Some(BridgeMessage::TestError {
                test_run_id: run_id,
                error: detail.message.clone(),
                plugin_state: context.plugin_state.take(),
                original_error: Some(detail),
            }),
            Err(payload) => {
                let detail = ErrorDetail::new("Error", panic_message(payload));
                Some(BridgeMessage::TestError {
                    test_run_id: run_id,
                    error: detail.message.clone(),
                    plugin_state: context.plugin_state.take(),
                    original_error: Some(detail),
                })
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "test body panicked".to_owned()
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::oneshot;

use plugkit_core::{PluginValue, TestRunId};

use crate::errors::BridgeError;
use crate::protocol::{self, BridgeMessage, ErrorDetail};
use crate::registry::TestRegistry;

/// Outbound half of the bridge's transport. The bridge sends ordinary
/// envelopes through whatever carries them; a closure over a transport
/// client is enough.
pub trait BridgeSender: Send + Sync {
    fn send(&self, message: BridgeMessage) -> Result<(), BridgeError>;
}

impl<F> BridgeSender for F
where
    F: Fn(BridgeMessage) -> Result<(), BridgeError> + Send + Sync,
{
    fn send(&self, message: BridgeMessage) -> Result<(), BridgeError> {
        self(message)
    }
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// How long a run may stay unanswered before it fails as timed out.
    pub timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Terminal states of a test run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Assertions,
    Error,
    Timeout,
    Cancelled,
}

impl BridgeError {
    /// The terminal run status this error corresponds to, if any.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            Self::TestTimeout { .. } => Some(RunStatus::Timeout),
            Self::Cancelled { .. } => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

/// Settled record of one test run. `assertions` is the ordered list of
/// recorded expressions, ready to replay against the local assertion
/// library — the real pass/fail happens there.
#[derive(Clone, Debug)]
pub struct TestRun {
    pub id: TestRunId,
    pub test_name: String,
    pub status: RunStatus,
    pub assertions: Vec<String>,
    pub return_value: Option<PluginValue>,
    pub error: Option<ErrorDetail>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Caller-side half of the bridge: correlates responses by run id and
/// races every run against a timeout. Each run settles exactly once.
pub struct TestRunner {
    sender: Arc<dyn BridgeSender>,
    registry: TestRegistry,
    pending: DashMap<TestRunId, oneshot::Sender<BridgeMessage>>,
    timeout: Duration,
}

impl TestRunner {
    pub fn new(sender: Arc<dyn BridgeSender>, config: RunnerConfig) -> Self {
        Self {
            sender,
            registry: TestRegistry::new(),
            pending: DashMap::new(),
            timeout: config.timeout,
        }
    }

    /// Register a test once. Duplicates fail locally and are never sent.
    pub fn register(&self, name: &str, fn_string: &str) -> Result<(), BridgeError> {
        self.registry.register(name, fn_string)?;
        self.sender.send(BridgeMessage::RegisterTest {
            test_name: name.to_owned(),
            fn_string: fn_string.to_owned(),
        })
    }

    /// Run a previously registered test.
    pub async fn run(&self, test_name: &str) -> Result<TestRun, BridgeError> {
        self.run_with(test_name, None).await
    }

    /// Run with an inline fragment instead of a prior registration.
    pub async fn run_with(
        &self,
        test_name: &str,
        inline: Option<String>,
    ) -> Result<TestRun, BridgeError> {
        let run_id = TestRunId::new();
        let (slot, response) = oneshot::channel();
        self.pending.insert(run_id.clone(), slot);
        let started_at = Utc::now();

        if let Err(err) = self.sender.send(BridgeMessage::RunTest {
            test_name: test_name.to_owned(),
            test_run_id: run_id.clone(),
            test_fn: inline,
        }) {
            self.pending.remove(&run_id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, response).await {
            Err(_elapsed) => {
                // The timer won. Drop the slot first so a late reply is
                // discarded, then tell the host best-effort.
                self.pending.remove(&run_id);
                let _ = self.sender.send(BridgeMessage::CancelTest {
                    test_run_id: run_id.clone(),
                    reason: "timeout".to_owned(),
                });
                Err(BridgeError::TestTimeout {
                    run_id,
                    test_name: test_name.to_owned(),
                    timeout: self.timeout,
                })
            }
            Ok(Err(_abandoned)) => Err(BridgeError::Cancelled {
                run_id,
                reason: "cancelled".to_owned(),
            }),
            Ok(Ok(message)) => Ok(settle(run_id, test_name, started_at, message)),
        }
    }

    /// Abandon a pending run and tell the host. The waiting `run` call
    /// resolves with a cancellation error.
    pub fn cancel(&self, run_id: &TestRunId, reason: &str) {
        if self.pending.remove(run_id).is_some() {
            let _ = self.sender.send(BridgeMessage::CancelTest {
                test_run_id: run_id.clone(),
                reason: reason.to_owned(),
            });
        }
    }

    /// Feed a bridge message observed on the transport. Responses resolve
    /// their pending run exactly once; late or unknown ids are dropped.
    pub fn handle_response(&self, message: BridgeMessage) {
        let run_id = match &message {
            BridgeMessage::TestAssertions { test_run_id, .. }
            | BridgeMessage::TestError { test_run_id, .. } => test_run_id.clone(),
            _ => return,
        };
        match self.pending.remove(&run_id) {
            Some((_, slot)) => {
                let _ = slot.send(message);
            }
            None => {
                tracing::debug!(run_id = %run_id, "discarding response for unknown or settled run");
            }
        }
    }

    /// Number of runs still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn settle(
    run_id: TestRunId,
    test_name: &str,
    started_at: DateTime<Utc>,
    message: BridgeMessage,
) -> TestRun {
    let finished_at = Utc::now();
    match message {
        BridgeMessage::TestAssertions {
            assertion_code,
            return_value,
            ..
        } => TestRun {
            id: run_id,
            test_name: test_name.to_owned(),
            status: RunStatus::Assertions,
            assertions: protocol::split_assertions(&assertion_code),
            return_value,
            error: None,
            started_at,
            finished_at,
        },
        BridgeMessage::TestError {
            error,
            original_error,
            ..
        } => TestRun {
            id: run_id,
            test_name: test_name.to_owned(),
            status: RunStatus::Error,
            assertions: Vec::new(),
            return_value: None,
            error: Some(original_error.unwrap_or_else(|| ErrorDetail::new("Error", error))),
            started_at,
            finished_at,
        },
        other => TestRun {
            id: run_id,
            test_name: test_name.to_owned(),
            status: RunStatus::Error,
            assertions: Vec::new(),
            return_value: None,
            error: Some(ErrorDetail::new(
                "Error",
                format!("unexpected bridge response: {other:?}"),
            )),
            started_at,
            finished_at,
        },
    }
}

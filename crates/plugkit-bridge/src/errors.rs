use std::time::Duration;

use plugkit_core::TestRunId;

/// Bridge failures surfaced to the caller of a specific registration or
/// run. Test-body failures are not here: they travel as `TEST_ERROR`
/// payloads and come back as data, never as a thrown error.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("test '{name}' is already registered")]
    DuplicateRegistration { name: String },

    #[error("test '{test_name}' did not respond within {timeout:?} (run {run_id})")]
    TestTimeout {
        run_id: TestRunId,
        test_name: String,
        timeout: Duration,
    },

    #[error("test run {run_id} was cancelled: {reason}")]
    Cancelled { run_id: TestRunId, reason: String },

    #[error("could not load test fragment: {0}")]
    Load(String),

    #[error("bridge transport unavailable: {0}")]
    Transport(String),
}

impl BridgeError {
    /// Short classification string for logs and test reports. Reports need
    /// to tell "assertion failed" apart from "did not respond in time".
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::DuplicateRegistration { .. } => "duplicate_registration",
            Self::TestTimeout { .. } => "test_timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Load(_) => "fragment_load",
            Self::Transport(_) => "transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinguishable_from_other_failures() {
        let err = BridgeError::TestTimeout {
            run_id: TestRunId::from_raw("run_1"),
            test_name: "creates a frame".into(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.error_kind(), "test_timeout");
        assert!(err.to_string().contains("did not respond"));

        let dup = BridgeError::DuplicateRegistration { name: "t".into() };
        assert_eq!(dup.error_kind(), "duplicate_registration");
    }
}

use serde::{Deserialize, Serialize};

use plugkit_core::envelope::{Envelope, PluginValue};
use plugkit_core::TestRunId;

/// Separator between recorded assertions in `assertionCode`. The caller
/// splits on the same separator to rebuild the ordered list for replay.
pub const ASSERTION_SEPARATOR: &str = ";\n";

/// Normalized view of a value thrown inside the sandboxed test body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorDetail {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }
}

/// Test-bridge sub-protocol. These ride inside ordinary envelopes; the
/// bridge never talks to the relay directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BridgeMessage {
    #[serde(rename = "REGISTER_TEST", rename_all = "camelCase")]
    RegisterTest { test_name: String, fn_string: String },

    #[serde(rename = "RUN_TEST", rename_all = "camelCase")]
    RunTest {
        test_name: String,
        test_run_id: TestRunId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        test_fn: Option<String>,
    },

    #[serde(rename = "TEST_ASSERTIONS", rename_all = "camelCase")]
    TestAssertions {
        test_run_id: TestRunId,
        assertion_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_value: Option<PluginValue>,
    },

    #[serde(rename = "TEST_ERROR", rename_all = "camelCase")]
    TestError {
        test_run_id: TestRunId,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin_state: Option<PluginValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_error: Option<ErrorDetail>,
    },

    #[serde(rename = "CANCEL_TEST", rename_all = "camelCase")]
    CancelTest { test_run_id: TestRunId, reason: String },
}

impl BridgeMessage {
    /// The run this message belongs to, for response correlation.
    pub fn run_id(&self) -> Option<&TestRunId> {
        match self {
            Self::RegisterTest { .. } => None,
            Self::RunTest { test_run_id, .. }
            | Self::TestAssertions { test_run_id, .. }
            | Self::TestError { test_run_id, .. }
            | Self::CancelTest { test_run_id, .. } => Some(test_run_id),
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        // A closed enum over value trees serializes to JSON unconditionally.
        let json = serde_json::to_value(self).expect("bridge message serialization is infallible");
        Envelope::new(PluginValue::from(json))
    }

    /// Interpret an envelope's payload as a bridge message, if it is one.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let fields = envelope.plugin_message.as_object()?;
        fields.get("type")?;
        serde_json::from_value(envelope.plugin_message.clone().into_json()).ok()
    }
}

pub fn join_assertions(assertions: &[String]) -> String {
    assertions.join(ASSERTION_SEPARATOR)
}

pub fn split_assertions(code: &str) -> Vec<String> {
    code.split(ASSERTION_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugkit_core::envelope::{decode, encode};

    #[test]
    fn register_test_wire_shape() {
        let msg = BridgeMessage::RegisterTest {
            test_name: "t1".into(),
            fn_string: "expect(1).to.equal(1)".into(),
        };
        let wire = encode(&msg.to_envelope());
        assert!(wire.contains("\"type\":\"REGISTER_TEST\""), "got: {wire}");
        assert!(wire.contains("\"testName\":\"t1\""));
        assert!(wire.contains("\"fnString\""));
    }

    #[test]
    fn run_test_omits_absent_inline_fn() {
        let msg = BridgeMessage::RunTest {
            test_name: "t1".into(),
            test_run_id: TestRunId::from_raw("run_1"),
            test_fn: None,
        };
        let wire = encode(&msg.to_envelope());
        assert!(wire.contains("\"testRunId\":\"run_1\""));
        assert!(!wire.contains("testFn"));
    }

    #[test]
    fn bridge_messages_roundtrip_through_envelopes() {
        let msg = BridgeMessage::TestError {
            test_run_id: TestRunId::from_raw("run_9"),
            error: "boom".into(),
            plugin_state: Some(PluginValue::Bytes(vec![1, 2])),
            original_error: Some(ErrorDetail::new("Error", "boom")),
        };
        let env = decode(&encode(&msg.to_envelope())).unwrap();
        assert_eq!(BridgeMessage::from_envelope(&env), Some(msg));
    }

    #[test]
    fn control_and_app_payloads_are_not_bridge_messages() {
        let env = plugkit_core::ControlMessage::Ping.to_envelope();
        assert_eq!(BridgeMessage::from_envelope(&env), None);

        let app = Envelope::new("hello".into());
        assert_eq!(BridgeMessage::from_envelope(&app), None);
    }

    #[test]
    fn assertions_split_and_join_preserve_order() {
        let assertions = vec![
            "expect(1).to.equal(1)".to_owned(),
            "expect(\"a\").to.eql(\"a\")".to_owned(),
        ];
        let joined = join_assertions(&assertions);
        assert_eq!(split_assertions(&joined), assertions);
    }

    #[test]
    fn single_assertion_roundtrips_verbatim() {
        let joined = join_assertions(&["expect(1).to.equal(1)".to_owned()]);
        assert_eq!(joined, "expect(1).to.equal(1)");
        assert_eq!(split_assertions(&joined).len(), 1);
    }

    #[test]
    fn run_id_correlation() {
        let msg = BridgeMessage::CancelTest {
            test_run_id: TestRunId::from_raw("run_5"),
            reason: "timeout".into(),
        };
        assert_eq!(msg.run_id().unwrap().as_str(), "run_5");

        let reg = BridgeMessage::RegisterTest {
            test_name: "t".into(),
            fn_string: "f".into(),
        };
        assert!(reg.run_id().is_none());
    }
}

use std::sync::Arc;

use parking_lot::Mutex;

use plugkit_core::PluginValue;

/// Chain words that connect an expectation without asserting anything.
/// A call to any other name closes the current assertion.
const CONNECTIVES: &[&str] = &["be", "have", "to", "an", "a", "that", "which", "and"];

/// Ordered record of assertion expressions captured during one test run.
///
/// Nothing is ever evaluated here: the sandbox records intent, and the
/// real assertion library replays the expressions outside it. That is
/// what makes host-only test code runnable by a standard test runner.
#[derive(Clone, Default)]
pub struct AssertionLog {
    assertions: Arc<Mutex<Vec<String>>>,
}

impl AssertionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording a chain for `value`.
    pub fn expect(&self, value: impl Into<PluginValue>) -> Chain {
        let seed = format!("expect({})", render_value(&value.into()));
        Chain {
            log: self.clone(),
            expr: seed.clone(),
            seed,
        }
    }

    /// Drain the recorded assertions in call order.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.assertions.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.assertions.lock().is_empty()
    }

    fn push(&self, assertion: String) {
        self.assertions.lock().push(assertion);
    }
}

/// In-progress expectation chain. Property accesses and connective calls
/// accumulate; a terminal call commits the expression to the log and
/// reseeds the chain from the original value.
pub struct Chain {
    log: AssertionLog,
    seed: String,
    expr: String,
}

impl Chain {
    /// Record a property access. Properties never terminate a chain.
    pub fn property(mut self, name: &str) -> Self {
        self.expr.push('.');
        self.expr.push_str(name);
        self
    }

    /// Record a method call. Connective names continue the chain; any
    /// other name closes the assertion.
    pub fn call(mut self, name: &str, args: &[PluginValue]) -> Self {
        let rendered: Vec<String> = args.iter().map(render_value).collect();
        self.expr.push_str(&format!(".{}({})", name, rendered.join(", ")));
        if !CONNECTIVES.contains(&name) {
            let committed = std::mem::replace(&mut self.expr, self.seed.clone());
            self.log.push(committed);
        }
        self
    }

    // Sugar mirroring the recorded DSL.

    pub fn to(self) -> Self {
        self.property("to")
    }

    pub fn be(self) -> Self {
        self.property("be")
    }

    pub fn have(self) -> Self {
        self.property("have")
    }

    pub fn and(self) -> Self {
        self.property("and")
    }

    pub fn that(self) -> Self {
        self.property("that")
    }

    pub fn which(self) -> Self {
        self.property("which")
    }

    pub fn a(self, kind: &str) -> Self {
        self.call("a", &[kind.into()])
    }

    pub fn an(self, kind: &str) -> Self {
        self.call("an", &[kind.into()])
    }

    pub fn equal(self, value: impl Into<PluginValue>) -> Self {
        self.call("equal", &[value.into()])
    }

    pub fn eql(self, value: impl Into<PluginValue>) -> Self {
        self.call("eql", &[value.into()])
    }
}

/// Structural rendering: nodes carrying a `type` or `id` string render as
/// that field's string; everything else as JSON.
fn render_value(value: &PluginValue) -> String {
    if let Some(fields) = value.as_object() {
        for key in ["type", "id"] {
            if let Some(PluginValue::String(name)) = fields.get(key) {
                return json_text(&PluginValue::String(name.clone()));
            }
        }
    }
    json_text(value)
}

fn json_text(value: &PluginValue) -> String {
    // Value trees have string keys and finite numbers only.
    serde_json::to_string(value).expect("value tree serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn node(entries: &[(&str, PluginValue)]) -> PluginValue {
        PluginValue::Object(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn simple_chain_records_one_assertion() {
        let log = AssertionLog::new();
        log.expect(1i64).to().equal(1i64);
        assert_eq!(log.take(), vec!["expect(1).to.equal(1)"]);
    }

    #[test]
    fn terminal_call_reseeds_from_the_original_value() {
        let log = AssertionLog::new();
        log.expect(2i64).to().be().a("number").to().equal(2i64);
        // `a` is a connective call, so it stays inside the first assertion.
        assert_eq!(
            log.take(),
            vec!["expect(2).to.be.a(\"number\").to.equal(2)".to_owned()]
        );

        log.expect(3i64).to().equal(3i64).and().equal(3i64);
        assert_eq!(
            log.take(),
            vec![
                "expect(3).to.equal(3)".to_owned(),
                "expect(3).and.equal(3)".to_owned(),
            ]
        );
    }

    #[test]
    fn assertions_keep_call_order_across_chains() {
        let log = AssertionLog::new();
        log.expect("x").to().equal("x");
        log.expect(true).to().be().equal(true);
        let recorded = log.take();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0], "expect(\"x\").to.equal(\"x\")");
        assert_eq!(recorded[1], "expect(true).to.be.equal(true)");
    }

    #[test]
    fn node_with_type_field_renders_as_the_type_string() {
        let log = AssertionLog::new();
        let rect = node(&[("type", "RECTANGLE".into()), ("width", 100i64.into())]);
        log.expect(rect).to().have().call("property", &["width".into()]);
        assert_eq!(
            log.take(),
            vec!["expect(\"RECTANGLE\").to.have.property(\"width\")"]
        );
    }

    #[test]
    fn node_with_id_field_renders_as_the_id_string() {
        let log = AssertionLog::new();
        let with_id = node(&[("id", "17:3".into()), ("visible", true.into())]);
        log.expect(with_id).to().call("exist", &[]);
        assert_eq!(log.take(), vec!["expect(\"17:3\").to.exist()"]);
    }

    #[test]
    fn plain_objects_render_as_json() {
        let log = AssertionLog::new();
        let value = node(&[("width", 10i64.into())]);
        log.expect(value.clone()).to().eql(value);
        assert_eq!(
            log.take(),
            vec!["expect({\"width\":10}).to.eql({\"width\":10})"]
        );
    }

    #[test]
    fn unterminated_chains_record_nothing() {
        let log = AssertionLog::new();
        let _chain = log.expect(1i64).to().be();
        assert!(log.is_empty());
    }

    #[test]
    fn logs_are_independent() {
        let a = AssertionLog::new();
        let b = AssertionLog::new();
        a.expect(1i64).equal(1i64);
        assert!(b.is_empty());
        assert_eq!(a.take().len(), 1);
    }
}

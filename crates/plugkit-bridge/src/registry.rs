use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::errors::BridgeError;

#[derive(Clone, Debug, PartialEq)]
pub struct RegisteredTest {
    pub name: String,
    pub source: String,
}

/// Named test fragments, registered once each. Registering a name twice is
/// a hard error and leaves the first registration intact.
#[derive(Default)]
pub struct TestRegistry {
    tests: DashMap<String, RegisteredTest>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, source: &str) -> Result<(), BridgeError> {
        match self.tests.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateRegistration {
                name: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(RegisteredTest {
                    name: name.to_owned(),
                    source: source.to_owned(),
                });
                Ok(())
            }
        }
    }

    pub fn source(&self, name: &str) -> Option<String> {
        self.tests.get(name).map(|t| t.source.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tests.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

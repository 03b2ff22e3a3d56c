//! Session state: synchronous in-memory facts about the current session.
//!
//! Holds small scalar/structured values (flags, ids, user-session facts)
//! keyed by reference. Mutation goes through the transaction coordinator;
//! this type is plain data guarded by the runtime's state lock.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::Reference;

#[derive(Debug, Default)]
pub struct SessionStateStore {
    values: BTreeMap<Reference, Value>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &Reference) -> Option<&Value> {
        self.values.get(reference)
    }

    /// Apply one buffered write. Returns true when the stored value
    /// actually changed, so the engine can skip spurious notifications.
    pub fn apply(&mut self, reference: &Reference, value: Option<Value>) -> bool {
        match value {
            Some(value) => {
                let changed = self.values.get(reference) != Some(&value);
                if changed {
                    self.values.insert(reference.clone(), value);
                }
                changed
            }
            None => self.values.remove(reference).is_some(),
        }
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.values.contains_key(reference)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TagGraph;
    use serde_json::json;

    fn reference(path: &str) -> Reference {
        let mut b = TagGraph::builder("app").unwrap();
        b.node("app.session.logged_in").unwrap();
        b.node("app.session.currency").unwrap();
        let g = b.build();
        Reference::new(g.tag(path).unwrap())
    }

    #[test]
    fn set_get_clear() {
        let mut store = SessionStateStore::new();
        let r = reference("app.session.logged_in");
        assert!(store.get(&r).is_none());

        assert!(store.apply(&r, Some(json!(true))));
        assert_eq!(store.get(&r), Some(&json!(true)));

        // Same value again is not a change.
        assert!(!store.apply(&r, Some(json!(true))));

        assert!(store.apply(&r, None));
        assert!(store.get(&r).is_none());
        assert!(!store.apply(&r, None));
    }
}

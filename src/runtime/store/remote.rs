//! Remote configuration: a read-mostly payload with a local override layer.
//!
//! The payload itself is fetched by an external collaborator and installed
//! wholesale; overrides take precedence until cleared and exist for local
//! testing and experimentation. A stale or absent payload is tolerated:
//! a missing key is a value-level error upstream, never a crash here.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::Reference;

#[derive(Debug, Default)]
pub struct RemoteConfigStore {
    payload: BTreeMap<Reference, Value>,
    overrides: BTreeMap<Reference, Value>,
    /// Bumped on every install or override change; live queries over this
    /// store re-evaluate when it moves.
    epoch: u64,
}

impl RemoteConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override wins over the installed payload.
    pub fn get(&self, reference: &Reference) -> Option<&Value> {
        self.overrides
            .get(reference)
            .or_else(|| self.payload.get(reference))
    }

    /// Replace the whole remote payload (the transport collaborator just
    /// fetched a fresh one). Overrides survive installs.
    pub fn install(&mut self, payload: BTreeMap<Reference, Value>) {
        self.payload = payload;
        self.epoch += 1;
    }

    pub fn set_override(&mut self, reference: Reference, value: Value) {
        self.overrides.insert(reference, value);
        self.epoch += 1;
    }

    pub fn clear_override(&mut self, reference: &Reference) -> bool {
        let removed = self.overrides.remove(reference).is_some();
        if removed {
            self.epoch += 1;
        }
        removed
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TagGraph;
    use serde_json::json;

    fn graph() -> TagGraph {
        let mut b = TagGraph::builder("app").unwrap();
        b.node("app.configuration.announcement").unwrap();
        b.node("app.configuration.maintenance").unwrap();
        b.build()
    }

    #[test]
    fn override_beats_payload_until_cleared() {
        let g = graph();
        let r = Reference::new(g.tag("app.configuration.announcement").unwrap());
        let mut store = RemoteConfigStore::new();

        store.install(BTreeMap::from([(r.clone(), json!("hello"))]));
        assert_eq!(store.get(&r), Some(&json!("hello")));

        store.set_override(r.clone(), json!("patched"));
        assert_eq!(store.get(&r), Some(&json!("patched")));

        // A fresh install does not clobber the override.
        store.install(BTreeMap::from([(r.clone(), json!("newer"))]));
        assert_eq!(store.get(&r), Some(&json!("patched")));

        assert!(store.clear_override(&r));
        assert_eq!(store.get(&r), Some(&json!("newer")));
        assert!(!store.clear_override(&r));
    }

    #[test]
    fn missing_key_is_none() {
        let g = graph();
        let r = Reference::new(g.tag("app.configuration.maintenance").unwrap());
        let store = RemoteConfigStore::new();
        assert!(store.get(&r).is_none());
    }

    #[test]
    fn epoch_moves_on_every_visible_change() {
        let g = graph();
        let r = Reference::new(g.tag("app.configuration.maintenance").unwrap());
        let mut store = RemoteConfigStore::new();
        let e0 = store.epoch();
        store.install(BTreeMap::new());
        store.set_override(r.clone(), json!(1));
        store.clear_override(&r);
        assert_eq!(store.epoch(), e0 + 3);
    }
}

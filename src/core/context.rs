//! Call-site bindings supplying ids and parameters for tag resolution.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use super::graph::{GraphError, Tag, TagGraph};
use super::reference::Reference;

/// A value bound to a tag in a [`Context`].
#[derive(Clone, Debug, PartialEq)]
pub enum ContextValue {
    Str(String),
    Tag(Tag),
    Json(Value),
    Ref(Reference),
}

impl ContextValue {
    /// Render this value as a collection index id, if it is direct.
    ///
    /// `Tag` and `Ref` values are indirect: they name another location whose
    /// current value supplies the id, and must be resolved by the caller.
    pub fn as_index_id(&self) -> Option<String> {
        match self {
            ContextValue::Str(s) => Some(s.clone()),
            ContextValue::Json(Value::String(s)) => Some(s.clone()),
            ContextValue::Json(Value::Number(n)) => Some(n.to_string()),
            ContextValue::Json(Value::Bool(b)) => Some(b.to_string()),
            ContextValue::Json(_) | ContextValue::Tag(_) | ContextValue::Ref(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ContextValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        ContextValue::Str(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        ContextValue::Str(s)
    }
}

impl From<Value> for ContextValue {
    fn from(v: Value) -> Self {
        ContextValue::Json(v)
    }
}

impl From<Tag> for ContextValue {
    fn from(t: Tag) -> Self {
        ContextValue::Tag(t)
    }
}

impl From<Reference> for ContextValue {
    fn from(r: Reference) -> Self {
        ContextValue::Ref(r)
    }
}

/// Unordered unique-key map from [`Tag`] to a bound value.
///
/// Contexts are created fresh per call; composing nested calls merges them
/// right-biased (the overriding context wins on key conflicts).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context {
    entries: BTreeMap<Tag, ContextValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, tag: Tag, value: impl Into<ContextValue>) -> Self {
        self.entries.insert(tag, value.into());
        self
    }

    /// Builder-style insert keyed by dotted path instead of a tag handle.
    pub fn with_path(
        self,
        graph: &TagGraph,
        path: &str,
        value: impl Into<ContextValue>,
    ) -> Result<Self, GraphError> {
        let tag = graph.tag(path)?;
        Ok(self.with(tag, value))
    }

    pub fn insert(&mut self, tag: Tag, value: impl Into<ContextValue>) -> Option<ContextValue> {
        self.entries.insert(tag, value.into())
    }

    pub fn get(&self, tag: &Tag) -> Option<&ContextValue> {
        self.entries.get(tag)
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.entries.contains_key(tag)
    }

    /// Right-biased merge: entries in `overriding` win.
    pub fn merged(&self, overriding: &Context) -> Context {
        let mut entries = self.entries.clone();
        for (tag, value) in &overriding.entries {
            entries.insert(tag.clone(), value.clone());
        }
        Context { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tag, &ContextValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (tag, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                ContextValue::Str(s) => write!(f, "{tag}: {s:?}")?,
                ContextValue::Tag(t) => write!(f, "{tag}: -> {t}")?,
                ContextValue::Json(v) => write!(f, "{tag}: {v}")?,
                ContextValue::Ref(r) => write!(f, "{tag}: -> {r}")?,
            }
        }
        write!(f, "}}")
    }
}

//! Reference resolution: binding a tag's required indices before routing.
//!
//! Every read and write starts here. The resolver walks the tag's lineage
//! root-first and supplies an id for each collection it crosses, trying in
//! order: a direct context binding, an indirect context binding (a tag or
//! reference naming the location that holds the id), and finally the
//! collection's current-id slot in session state.
//!
//! Indirect bindings recurse; an explicit stack bounds the recursion and
//! turns self-referential configurations into a value-level error instead
//! of a hang.

use serde_json::Value;
use thiserror::Error;

use crate::core::{
    Context, ContextValue, FetchError, Limits, Reference, ReferenceError, StoreKind, Tag,
};

/// Read seam the resolver uses to follow indirect bindings and current-id
/// slots. Implemented by the runtime over its stores; tests supply fakes.
pub trait ValueSource {
    /// Current value at a fully bound reference, if present.
    fn current_value(&self, reference: &Reference) -> Option<Value>;
}

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ResolveError {
    #[error("index `{key}` has no value at `{reference}`")]
    Unresolved { reference: String, key: String },
    #[error("index `{key}` resolves through `{via}` to a value that is not an id")]
    NotAnId { key: String, via: String },
    #[error("resolution cycle through `{via}`")]
    Cycle { via: String },
    #[error("resolution recursed past depth {limit}")]
    DepthExceeded { limit: usize },
    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

impl ResolveError {
    /// Surface as a value-level fetch error for the tag being resolved.
    pub fn into_fetch(self, origin: &Tag) -> FetchError {
        match self {
            ResolveError::Unresolved { reference, .. } => FetchError::KeyDoesNotExist {
                reference,
                store: StoreKind::SessionState.as_str(),
            },
            ResolveError::NotAnId { key, via } => FetchError::InvalidReference {
                reference: origin.path().to_string(),
                reason: format!("index `{key}` resolves through `{via}` to a non-id value"),
            },
            ResolveError::Cycle { via } => FetchError::ResolutionCycle { via },
            ResolveError::DepthExceeded { limit } => FetchError::ResolutionCycle {
                via: format!("recursion past depth {limit}"),
            },
            ResolveError::Reference(err) => FetchError::InvalidReference {
                reference: origin.path().to_string(),
                reason: err.to_string(),
            },
        }
    }
}

/// Outcome of one resolution attempt.
///
/// `dependencies` lists every reference the resolver read, including slots
/// that turned out to be absent. Live queries watch exactly this set, so a
/// query that failed on a missing current-id re-evaluates the moment that
/// id is written.
#[derive(Debug)]
pub struct Resolution {
    pub outcome: Result<Reference, ResolveError>,
    pub dependencies: Vec<Reference>,
}

/// Resolve `tag` into a routable reference under `context`.
///
/// With `allow_bare_terminal`, a terminal collection tag may stay unbound
/// (a whole-collection write); its own id is still bound when one is
/// available.
pub fn resolve(
    limits: &Limits,
    source: &dyn ValueSource,
    tag: &Tag,
    context: &Context,
    allow_bare_terminal: bool,
) -> Resolution {
    let mut state = ResolveState {
        limits,
        source,
        context,
        stack: Vec::new(),
        dependencies: Vec::new(),
    };
    let outcome = state.bind(tag, allow_bare_terminal);
    Resolution {
        outcome,
        dependencies: state.dependencies,
    }
}

struct ResolveState<'a> {
    limits: &'a Limits,
    source: &'a dyn ValueSource,
    context: &'a Context,
    stack: Vec<Tag>,
    dependencies: Vec<Reference>,
}

impl ResolveState<'_> {
    fn bind(&mut self, tag: &Tag, allow_bare_terminal: bool) -> Result<Reference, ResolveError> {
        let mut reference = Reference::new(tag.clone());
        let own_key = if allow_bare_terminal && tag.is_collection() {
            tag.index_key()
        } else {
            None
        };
        for key in reference.required_indices() {
            match self.index_id(&key) {
                Ok(id) => reference = reference.with_index(key, id)?,
                Err(ResolveError::Unresolved { .. }) if Some(&key) == own_key.as_ref() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(reference)
    }

    /// Produce the id bound to one collection index key.
    fn index_id(&mut self, key: &Tag) -> Result<String, ResolveError> {
        if self.stack.len() >= self.limits.max_resolution_depth {
            return Err(ResolveError::DepthExceeded {
                limit: self.limits.max_resolution_depth,
            });
        }
        if self.stack.contains(key) {
            return Err(ResolveError::Cycle {
                via: key.path().to_string(),
            });
        }
        self.stack.push(key.clone());
        let id = self.index_id_inner(key);
        self.stack.pop();
        id
    }

    fn index_id_inner(&mut self, key: &Tag) -> Result<String, ResolveError> {
        match self.context.get(key).cloned() {
            Some(value) => {
                if let Some(id) = value.as_index_id() {
                    return Ok(id);
                }
                match value {
                    ContextValue::Tag(target) => {
                        let target = self.bind(&target, false)?;
                        self.read_id(key, target)
                    }
                    ContextValue::Ref(target) => {
                        let mut target = target;
                        for missing in target.missing_indices() {
                            let id = self.index_id(&missing)?;
                            target = target.with_index(missing, id)?;
                        }
                        self.read_id(key, target)
                    }
                    other => Err(ResolveError::NotAnId {
                        key: key.path().to_string(),
                        via: format!("context value {other:?}"),
                    }),
                }
            }
            // No context binding: fall back to the collection's current-id
            // slot in session state.
            None => {
                let slot = self.bind(key, false)?;
                self.read_id(key, slot)
            }
        }
    }

    /// Read a fully bound location and render its value as an index id,
    /// recording the read as a dependency either way.
    fn read_id(&mut self, key: &Tag, target: Reference) -> Result<String, ResolveError> {
        let value = self.source.current_value(&target);
        self.dependencies.push(target.clone());
        match value {
            Some(Value::String(s)) => Ok(s),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(_) => Err(ResolveError::NotAnId {
                key: key.path().to_string(),
                via: target.to_string(),
            }),
            None => Err(ResolveError::Unresolved {
                reference: target.to_string(),
                key: key.path().to_string(),
            }),
        }
    }
}

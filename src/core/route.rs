//! Storage-location paths derived from fully bound references.
//!
//! A route is the only addressing the local store understands: an ordered
//! walk from the root of the value tree, one step per lineage segment, with
//! collection segments substituted by their bound id.

use std::fmt;

use thiserror::Error;

use super::reference::Reference;

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum RouteError {
    #[error("cannot route `{reference}`: collection `{collection}` has no bound `{key}`")]
    MissingIndex {
        reference: String,
        collection: String,
        key: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouteStep {
    /// Named key of a static segment.
    Key(String),
    /// Positional member id of a collection segment.
    Index(String),
}

impl RouteStep {
    pub fn as_str(&self) -> &str {
        match self {
            RouteStep::Key(s) | RouteStep::Index(s) => s,
        }
    }
}

/// Ordered storage steps for the local store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    steps: Vec<RouteStep>,
    collection_terminal: bool,
}

impl Route {
    /// Compute the route for a fully bound reference.
    ///
    /// Any missing index fails with a descriptive error; there is no silent
    /// defaulting. Use [`Route::of_collection`] to address a whole
    /// collection by omitting the terminal id.
    pub fn of(reference: &Reference) -> Result<Route, RouteError> {
        Self::walk(reference, false)
    }

    /// Compute the route for a reference whose terminal segment is a bare
    /// collection: the final id is intentionally omitted and the route
    /// addresses the collection as a whole.
    pub fn of_collection(reference: &Reference) -> Result<Route, RouteError> {
        Self::walk(reference, true)
    }

    fn walk(reference: &Reference, allow_bare_terminal: bool) -> Result<Route, RouteError> {
        let lineage = reference.tag().lineage();
        let last = lineage.len() - 1;
        let mut steps = Vec::with_capacity(lineage.len() + 2);
        let mut collection_terminal = false;
        for (i, node) in lineage.iter().enumerate() {
            steps.push(RouteStep::Key(node.name().to_string()));
            if !node.is_collection() {
                continue;
            }
            let key = match node.index_key() {
                Some(key) => key,
                None => continue,
            };
            match reference.index(&key) {
                Some(id) => steps.push(RouteStep::Index(id.to_string())),
                None if i == last && allow_bare_terminal => {
                    collection_terminal = true;
                }
                // The `id` leaf addresses its collection's current-id slot
                // and does not need that collection bound.
                None if key == *reference.tag() => {}
                None => {
                    return Err(RouteError::MissingIndex {
                        reference: reference.to_string(),
                        collection: node.path().to_string(),
                        key: key.path().to_string(),
                    });
                }
            }
        }
        Ok(Route {
            steps,
            collection_terminal,
        })
    }

    pub fn steps(&self) -> &[RouteStep] {
        &self.steps
    }

    /// True when the terminal segment addressed the whole collection.
    pub fn is_collection_terminal(&self) -> bool {
        self.collection_terminal
    }

    /// Extend a collection-level route down into one member.
    pub fn member(&self, id: impl Into<String>) -> Route {
        debug_assert!(
            self.collection_terminal,
            "member() on a non-collection route"
        );
        let mut steps = self.steps.clone();
        steps.push(RouteStep::Index(id.into()));
        Route {
            steps,
            collection_terminal: false,
        }
    }

    /// True when one route is a prefix of the other (a write to either
    /// location can change what the other addresses).
    pub fn overlaps(&self, other: &Route) -> bool {
        let shorter = self.steps.len().min(other.steps.len());
        self.steps[..shorter] == other.steps[..shorter]
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                RouteStep::Key(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                RouteStep::Index(id) => write!(f, "[{id}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::TagGraph;
    use crate::core::reference::Reference;

    fn graph() -> TagGraph {
        let mut b = TagGraph::builder("app").unwrap();
        b.collection("app.account").unwrap();
        b.node("app.account.balance").unwrap();
        b.build()
    }

    #[test]
    fn bound_reference_routes() {
        let g = graph();
        let r = Reference::new(g.tag("app.account.balance").unwrap())
            .with_index(g.tag("app.account.id").unwrap(), "acc-1")
            .unwrap();
        let route = Route::of(&r).unwrap();
        assert_eq!(route.to_string(), "app.account[acc-1].balance");
        assert!(!route.is_collection_terminal());
    }

    #[test]
    fn missing_index_is_descriptive() {
        let g = graph();
        let r = Reference::new(g.tag("app.account.balance").unwrap());
        let err = Route::of(&r).unwrap_err();
        let RouteError::MissingIndex {
            collection, key, ..
        } = err;
        assert_eq!(collection, "app.account");
        assert_eq!(key, "app.account.id");
    }

    #[test]
    fn bare_terminal_collection_is_opt_in() {
        let g = graph();
        let r = Reference::new(g.tag("app.account").unwrap());
        assert!(Route::of(&r).is_err());
        let route = Route::of_collection(&r).unwrap();
        assert!(route.is_collection_terminal());
        assert_eq!(route.member("acc-9").to_string(), "app.account[acc-9]");
    }

    #[test]
    fn overlap_is_prefix_based() {
        let g = graph();
        let member = Reference::new(g.tag("app.account.balance").unwrap())
            .with_index(g.tag("app.account.id").unwrap(), "a")
            .unwrap();
        let other = Reference::new(g.tag("app.account.balance").unwrap())
            .with_index(g.tag("app.account.id").unwrap(), "b")
            .unwrap();
        let collection = Reference::new(g.tag("app.account").unwrap());

        let member = Route::of(&member).unwrap();
        let other = Route::of(&other).unwrap();
        let collection = Route::of_collection(&collection).unwrap();
        assert!(member.overlaps(&collection));
        assert!(collection.overlaps(&member));
        assert!(!member.overlaps(&other));
    }
}

//! References: a tag bound to the indices its lineage requires.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use super::graph::{GraphError, Tag, TagGraph};

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ReferenceError {
    #[error("reference `{reference}` is missing index `{key}`")]
    MissingIndex { reference: String, key: String },
    #[error("`{key}` does not index a collection in the lineage of `{tag}`")]
    ForeignIndex { tag: String, key: String },
    #[error("index id `{raw}` is invalid: {reason}")]
    InvalidId { raw: String, reason: String },
    #[error("reference `{raw}` failed to parse: {reason}")]
    Parse { raw: String, reason: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// A [`Tag`] paired with bindings for the collection indices in its lineage.
///
/// References are value types: equality is structural (same tag, same bound
/// indices). A reference is fully bound only when every collection ancestor
/// has an id; partially bound references must go back through resolution.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    tag: Tag,
    indices: BTreeMap<Tag, String>,
}

impl Reference {
    const MAX_ID_LEN: usize = 256;

    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            indices: BTreeMap::new(),
        }
    }

    /// Bind an index id. The key must be the `id` leaf of a collection in
    /// this reference's lineage; anything else is rejected so a reference
    /// never carries bindings it does not need.
    pub fn with_index(mut self, key: Tag, id: impl Into<String>) -> Result<Self, ReferenceError> {
        let id = id.into();
        validate_id(&id)?;
        let owner = key
            .collection_of()
            .ok_or_else(|| ReferenceError::ForeignIndex {
                tag: self.tag.path().to_string(),
                key: key.path().to_string(),
            })?;
        if !self.tag.is_descendant_of(&owner) {
            return Err(ReferenceError::ForeignIndex {
                tag: self.tag.path().to_string(),
                key: key.path().to_string(),
            });
        }
        self.indices.insert(key, id);
        Ok(self)
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn index(&self, key: &Tag) -> Option<&str> {
        self.indices.get(key).map(String::as_str)
    }

    pub fn indices(&self) -> impl Iterator<Item = (&Tag, &str)> {
        self.indices.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Index keys demanded by this reference's lineage, root-first.
    ///
    /// A collection's own `id` leaf addresses the collection's current-id
    /// slot and does not require its own collection to be bound.
    pub fn required_indices(&self) -> Vec<Tag> {
        let exempt = self.tag.collection_of();
        self.tag
            .lineage()
            .into_iter()
            .filter(|node| node.is_collection())
            .filter(|node| Some(node) != exempt.as_ref())
            .filter_map(|node| node.index_key())
            .collect()
    }

    /// Required indices with no binding yet, root-first.
    pub fn missing_indices(&self) -> Vec<Tag> {
        self.required_indices()
            .into_iter()
            .filter(|key| !self.indices.contains_key(key))
            .collect()
    }

    pub fn is_fully_bound(&self) -> bool {
        self.missing_indices().is_empty()
    }

    /// Validate that every collection ancestor has exactly one bound id.
    pub fn validate(&self) -> Result<(), ReferenceError> {
        if let Some(key) = self.missing_indices().into_iter().next() {
            return Err(ReferenceError::MissingIndex {
                reference: self.to_string(),
                key: key.path().to_string(),
            });
        }
        Ok(())
    }

    /// Parse the `a.b[id].c` rendering back into a reference.
    pub fn parse(graph: &TagGraph, raw: &str) -> Result<Self, ReferenceError> {
        let mut path = String::new();
        let mut ids: Vec<(String, String)> = Vec::new();
        for token in raw.split('.') {
            let (name, id) = match token.find('[') {
                Some(open) => {
                    let close = token.rfind(']').ok_or_else(|| ReferenceError::Parse {
                        raw: raw.to_string(),
                        reason: "unterminated `[`".into(),
                    })?;
                    if close != token.len() - 1 || close <= open {
                        return Err(ReferenceError::Parse {
                            raw: raw.to_string(),
                            reason: "malformed index brackets".into(),
                        });
                    }
                    (&token[..open], Some(token[open + 1..close].to_string()))
                }
                None => (token, None),
            };
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(name);
            if let Some(id) = id {
                ids.push((path.clone(), id));
            }
        }
        let tag = graph.tag(&path)?;
        let mut reference = Reference::new(tag);
        for (collection_path, id) in ids {
            let collection = graph.tag(&collection_path)?;
            let key = collection
                .index_key()
                .ok_or_else(|| ReferenceError::Parse {
                    raw: raw.to_string(),
                    reason: format!("`{collection_path}` is not a collection"),
                })?;
            reference = reference.with_index(key, id)?;
        }
        Ok(reference)
    }
}

fn validate_id(raw: &str) -> Result<(), ReferenceError> {
    if raw.is_empty() {
        return Err(ReferenceError::InvalidId {
            raw: raw.to_string(),
            reason: "empty".into(),
        });
    }
    if raw.len() > Reference::MAX_ID_LEN {
        return Err(ReferenceError::InvalidId {
            raw: raw.to_string(),
            reason: format!("length must be <= {}", Reference::MAX_ID_LEN),
        });
    }
    if raw.contains('[') || raw.contains(']') || raw.contains('.') {
        return Err(ReferenceError::InvalidId {
            raw: raw.to_string(),
            reason: "contains reserved character".into(),
        });
    }
    Ok(())
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.tag.lineage().iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", node.name())?;
            if let Some(key) = node.index_key() {
                if let Some(id) = self.indices.get(&key) {
                    write!(f, "[{id}]")?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({self})")
    }
}

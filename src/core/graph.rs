//! Tag graph: the immutable, shared taxonomy of dotted-path nodes.
//!
//! The graph is built once at startup and then shared read-only by every
//! other component. Nodes marked as collections are parameterized by a
//! runtime id; each collection carries a synthetic `id` leaf that names the
//! key indexing its members.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;

/// Name of the synthetic leaf under every collection node that addresses
/// the collection's current member id.
pub const INDEX_LEAF: &str = "id";

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum GraphError {
    #[error("tag segment `{raw}` is invalid: {reason}")]
    InvalidSegment { raw: String, reason: String },
    #[error("tag `{path}` is not defined in the graph")]
    Unknown { path: String },
    #[error("tag `{path}` conflicts with an existing node")]
    Duplicate { path: String },
    #[error("tag `{path}` exceeds maximum depth {max}")]
    DepthExceeded { path: String, max: usize },
    #[error("tag `{path}` is not a collection")]
    NotACollection { path: String },
    #[error("root tag `{expected}` does not match `{found}`")]
    WrongRoot { expected: String, found: String },
}

/// Backing-store category assigned to a subtree of the graph.
///
/// Routing resolves the nearest annotated ancestor; unannotated subtrees
/// default to [`Category::Local`]. NAPI ownership is dynamic (registered at
/// runtime) and therefore not part of the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    SessionState,
    RemoteConfig,
    Local,
}

#[derive(Debug)]
struct NodeData {
    name: String,
    path: String,
    parent: Option<usize>,
    children: BTreeMap<String, usize>,
    collection: bool,
    /// Set on synthetic `id` leaves: the collection node they index.
    index_of: Option<usize>,
    category: Option<Category>,
}

#[derive(Debug)]
struct GraphInner {
    nodes: Vec<NodeData>,
}

/// The shared taxonomy. Cheap to clone (one `Arc`).
#[derive(Clone, Debug)]
pub struct TagGraph {
    inner: Arc<GraphInner>,
}

impl TagGraph {
    pub fn builder(root: &str) -> Result<TagGraphBuilder, GraphError> {
        TagGraphBuilder::new(root)
    }

    pub fn root(&self) -> Tag {
        Tag {
            graph: self.clone(),
            node: 0,
        }
    }

    /// Look up a tag by its full dotted path (including the root segment).
    pub fn tag(&self, path: &str) -> Result<Tag, GraphError> {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or_default();
        if root != self.inner.nodes[0].name {
            return Err(GraphError::WrongRoot {
                expected: self.inner.nodes[0].name.clone(),
                found: root.to_string(),
            });
        }
        let mut node = 0usize;
        for segment in segments {
            node = match self.inner.nodes[node].children.get(segment) {
                Some(&child) => child,
                None => {
                    return Err(GraphError::Unknown {
                        path: path.to_string(),
                    })
                }
            };
        }
        Ok(Tag {
            graph: self.clone(),
            node,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    fn node(&self, idx: usize) -> &NodeData {
        &self.inner.nodes[idx]
    }
}

/// A node handle into the shared taxonomy.
///
/// Equality, ordering and hashing are by full dotted path, so tags from the
/// same graph behave as plain value types.
#[derive(Clone)]
pub struct Tag {
    graph: TagGraph,
    node: usize,
}

impl Tag {
    pub fn path(&self) -> &str {
        &self.graph.node(self.node).path
    }

    pub fn name(&self) -> &str {
        &self.graph.node(self.node).name
    }

    pub fn graph(&self) -> &TagGraph {
        &self.graph
    }

    pub fn parent(&self) -> Option<Tag> {
        self.graph.node(self.node).parent.map(|node| Tag {
            graph: self.graph.clone(),
            node,
        })
    }

    pub fn child(&self, name: &str) -> Option<Tag> {
        self.graph
            .node(self.node)
            .children
            .get(name)
            .map(|&node| Tag {
                graph: self.graph.clone(),
                node,
            })
    }

    /// Root-to-self chain of nodes.
    pub fn lineage(&self) -> Vec<Tag> {
        let mut chain = Vec::new();
        let mut cursor = Some(self.node);
        while let Some(idx) = cursor {
            chain.push(Tag {
                graph: self.graph.clone(),
                node: idx,
            });
            cursor = self.graph.node(idx).parent;
        }
        chain.reverse();
        chain
    }

    pub fn is_collection(&self) -> bool {
        self.graph.node(self.node).collection
    }

    /// The synthetic `id` leaf naming this collection's member index.
    pub fn index_key(&self) -> Option<Tag> {
        if !self.is_collection() {
            return None;
        }
        self.child(INDEX_LEAF)
    }

    /// True for the synthetic `id` leaf under a collection.
    pub fn is_collection_index(&self) -> bool {
        self.graph.node(self.node).index_of.is_some()
    }

    /// For a synthetic `id` leaf, the collection it indexes.
    pub fn collection_of(&self) -> Option<Tag> {
        self.graph.node(self.node).index_of.map(|node| Tag {
            graph: self.graph.clone(),
            node,
        })
    }

    pub fn is_descendant_of(&self, ancestor: &Tag) -> bool {
        let mut cursor = Some(self.node);
        while let Some(idx) = cursor {
            if idx == ancestor.node {
                return true;
            }
            cursor = self.graph.node(idx).parent;
        }
        false
    }

    /// Effective backing-store category: nearest annotated ancestor, else
    /// [`Category::Local`]. Collection `id` leaves always classify as
    /// session state (the "collection id" privileged category).
    pub fn category(&self) -> Category {
        if self.is_collection_index() {
            return Category::SessionState;
        }
        let mut cursor = Some(self.node);
        while let Some(idx) = cursor {
            if let Some(category) = self.graph.node(idx).category {
                return category;
            }
            cursor = self.graph.node(idx).parent;
        }
        Category::Local
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl Eq for Tag {}

impl PartialOrd for Tag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path().cmp(other.path())
    }
}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path().hash(state);
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.path())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Builds the taxonomy before it is frozen into a [`TagGraph`].
pub struct TagGraphBuilder {
    nodes: Vec<NodeData>,
}

impl TagGraphBuilder {
    const MAX_SEGMENT_LEN: usize = 64;
    const MAX_DEPTH: usize = 32;

    fn new(root: &str) -> Result<Self, GraphError> {
        validate_segment(root)?;
        Ok(Self {
            nodes: vec![NodeData {
                name: root.to_string(),
                path: root.to_string(),
                parent: None,
                children: BTreeMap::new(),
                collection: false,
                index_of: None,
                category: None,
            }],
        })
    }

    /// Define a node (intermediate nodes are created as needed).
    pub fn node(&mut self, path: &str) -> Result<&mut Self, GraphError> {
        self.ensure(path)?;
        Ok(self)
    }

    /// Define a node and mark it as a collection, adding its `id` leaf.
    pub fn collection(&mut self, path: &str) -> Result<&mut Self, GraphError> {
        let idx = self.ensure(path)?;
        if self.nodes[idx].collection {
            return Ok(self);
        }
        if self.nodes[idx].children.contains_key(INDEX_LEAF) {
            return Err(GraphError::Duplicate {
                path: format!("{path}.{INDEX_LEAF}"),
            });
        }
        self.nodes[idx].collection = true;
        let leaf_path = format!("{}.{INDEX_LEAF}", self.nodes[idx].path);
        let leaf = NodeData {
            name: INDEX_LEAF.to_string(),
            path: leaf_path,
            parent: Some(idx),
            children: BTreeMap::new(),
            collection: false,
            index_of: Some(idx),
            category: None,
        };
        let leaf_idx = self.nodes.len();
        self.nodes.push(leaf);
        self.nodes[idx]
            .children
            .insert(INDEX_LEAF.to_string(), leaf_idx);
        Ok(self)
    }

    /// Assign a backing-store category to a subtree.
    pub fn category(&mut self, path: &str, category: Category) -> Result<&mut Self, GraphError> {
        let idx = self.ensure(path)?;
        self.nodes[idx].category = Some(category);
        Ok(self)
    }

    pub fn build(self) -> TagGraph {
        TagGraph {
            inner: Arc::new(GraphInner { nodes: self.nodes }),
        }
    }

    fn ensure(&mut self, path: &str) -> Result<usize, GraphError> {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or_default();
        if root != self.nodes[0].name {
            return Err(GraphError::WrongRoot {
                expected: self.nodes[0].name.clone(),
                found: root.to_string(),
            });
        }
        let mut node = 0usize;
        let mut depth = 1usize;
        for segment in segments {
            depth += 1;
            if depth > Self::MAX_DEPTH {
                return Err(GraphError::DepthExceeded {
                    path: path.to_string(),
                    max: Self::MAX_DEPTH,
                });
            }
            if let Some(&child) = self.nodes[node].children.get(segment) {
                node = child;
                continue;
            }
            validate_segment(segment)?;
            if segment == INDEX_LEAF && self.nodes[node].collection {
                // The `id` leaf of a collection is synthetic.
                return Err(GraphError::Duplicate {
                    path: path.to_string(),
                });
            }
            let child_path = format!("{}.{segment}", self.nodes[node].path);
            let child = NodeData {
                name: segment.to_string(),
                path: child_path,
                parent: Some(node),
                children: BTreeMap::new(),
                collection: false,
                index_of: None,
                category: None,
            };
            let child_idx = self.nodes.len();
            self.nodes.push(child);
            self.nodes[node]
                .children
                .insert(segment.to_string(), child_idx);
            node = child_idx;
        }
        Ok(node)
    }
}

fn validate_segment(raw: &str) -> Result<(), GraphError> {
    if raw.is_empty() {
        return Err(GraphError::InvalidSegment {
            raw: raw.to_string(),
            reason: "empty".into(),
        });
    }
    if raw.len() > TagGraphBuilder::MAX_SEGMENT_LEN {
        return Err(GraphError::InvalidSegment {
            raw: raw.to_string(),
            reason: format!("length must be <= {}", TagGraphBuilder::MAX_SEGMENT_LEN),
        });
    }
    let bytes = raw.as_bytes();
    if !bytes[0].is_ascii_lowercase() {
        return Err(GraphError::InvalidSegment {
            raw: raw.to_string(),
            reason: "must start with [a-z]".into(),
        });
    }
    for &b in &bytes[1..] {
        let ok = b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_';
        if !ok {
            return Err(GraphError::InvalidSegment {
                raw: raw.to_string(),
                reason: "contains invalid character".into(),
            });
        }
    }
    Ok(())
}

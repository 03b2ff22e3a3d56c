//! Core data model (dependency order):
//! - graph: the immutable tag taxonomy
//! - context: per-call bindings
//! - reference: tag + bound indices
//! - route: storage-location paths for the local store
//! - fetch: value-or-error read outcomes with provenance
//! - limits: normative runtime limits

pub mod context;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod limits;
pub mod reference;
pub mod route;

pub use context::{Context, ContextValue};
pub use error::CoreError;
pub use fetch::{FetchError, FetchResult, Metadata, StoreKind};
pub use graph::{Category, GraphError, Tag, TagGraph, TagGraphBuilder, INDEX_LEAF};
pub use limits::Limits;
pub use reference::{Reference, ReferenceError};
pub use route::{Route, RouteError, RouteStep};

#![forbid(unsafe_code)]

pub mod core;
pub mod error;
pub mod runtime;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working vocabulary at crate root for convenience
pub use crate::core::{
    Category, Context, ContextValue, FetchError, FetchResult, Limits, Metadata, Reference, Route,
    StoreKind, Tag, TagGraph, TagGraphBuilder, INDEX_LEAF,
};
pub use crate::runtime::{
    BufferingPolicy, CachePolicy, EventKind, NapiRepository, RecvError, Runtime, RuntimeError,
    SessionEvent, Subscription, Transaction,
};

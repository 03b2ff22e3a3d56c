//! Canonical errors for the core data model.
//!
//! These are bounded and stable: core errors represent domain/refusal
//! states, not library implementation details.

use thiserror::Error;

use super::graph::GraphError;
use super::reference::ReferenceError;
use super::route::RouteError;

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Route(#[from] RouteError),
}

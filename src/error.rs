use thiserror::Error;

use crate::core::CoreError;
use crate::runtime::{ResolveError, RuntimeError};

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (state may have moved, capacity may have freed).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred.
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(_) => Transience::Permanent,
            Error::Runtime(err) => match err {
                // A missing current-id can appear at any moment.
                RuntimeError::Resolve(ResolveError::Unresolved { .. }) => Transience::Retryable,
                // Capacity frees up when subscribers drop.
                RuntimeError::Bus(_) | RuntimeError::LiveQueryLimit { .. } => Transience::Retryable,
                _ => Transience::Permanent,
            },
        }
    }

    pub fn effect(&self) -> Effect {
        // Transactions validate before applying, so a returned error means
        // no store was touched.
        Effect::None
    }
}

//! Value-or-error outcomes of resolving a reference against a store.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::reference::Reference;

/// Which backing store answered (or was supposed to answer) a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreKind {
    SessionState,
    RemoteConfig,
    Napi,
    Local,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::SessionState => "session_state",
            StoreKind::RemoteConfig => "remote_configuration",
            StoreKind::Napi => "napi",
            StoreKind::Local => "local",
        }
    }
}

/// Errors carried inside a read stream.
///
/// These are values, never unwound exceptions: an emission that fails does
/// not terminate its stream, and the next emission may succeed.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum FetchError {
    #[error("`{reference}` has no value in {store}")]
    KeyDoesNotExist {
        reference: String,
        store: &'static str,
    },
    #[error("reference `{reference}` is invalid: {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("resolution cycle through `{via}`")]
    ResolutionCycle { via: String },
    #[error("value at `{reference}` does not decode as {type_name}: {reason}")]
    Decoding {
        reference: String,
        type_name: &'static str,
        reason: String,
    },
    #[error("{0}")]
    Other(String),
}

/// Provenance attached to every emission: which store answered and the
/// originating reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    pub source: Option<StoreKind>,
    pub reference: Option<Reference>,
}

/// One emission of a read stream. Produced fresh per emission, never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchResult {
    Value(Value, Metadata),
    Error(FetchError, Metadata),
}

impl FetchResult {
    pub fn value(value: Value, source: StoreKind, reference: Reference) -> Self {
        FetchResult::Value(
            value,
            Metadata {
                source: Some(source),
                reference: Some(reference),
            },
        )
    }

    pub fn error(
        error: FetchError,
        source: Option<StoreKind>,
        reference: Option<Reference>,
    ) -> Self {
        FetchResult::Error(error, Metadata { source, reference })
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            FetchResult::Value(_, m) | FetchResult::Error(_, m) => m,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, FetchResult::Value(..))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FetchResult::Value(v, _) => Some(v),
            FetchResult::Error(..) => None,
        }
    }

    pub fn as_error(&self) -> Option<&FetchError> {
        match self {
            FetchResult::Error(e, _) => Some(e),
            FetchResult::Value(..) => None,
        }
    }

    /// Decode the carried value into the caller's requested type.
    ///
    /// A present-but-mismatched value is a [`FetchError::Decoding`], not a
    /// panic, so subscriptions survive bad payloads.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        match self {
            FetchResult::Value(value, meta) => {
                serde_json::from_value(value.clone()).map_err(|err| FetchError::Decoding {
                    reference: meta
                        .reference
                        .as_ref()
                        .map(|r| r.to_string())
                        .unwrap_or_default(),
                    type_name: std::any::type_name::<T>(),
                    reason: err.to_string(),
                })
            }
            FetchResult::Error(err, _) => Err(err.clone()),
        }
    }
}

//! Backing stores, each independently owned and externally pluggable.

pub mod local;
pub mod napi;
pub mod remote;
pub mod session;

use thiserror::Error;

pub use local::LocalStore;
pub use napi::{CachePolicy, NapiError, NapiRegistration, NapiRegistry, NapiRepository};
pub use remote::RemoteConfigStore;
pub use session::SessionStateStore;

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum StoreError {
    #[error("cannot write a {found} at collection `{route}`: expected an object of members")]
    InvalidCollectionValue { route: String, found: &'static str },
    #[error("references routed to {kind} do not accept writes")]
    UnsupportedWrite { kind: &'static str },
    #[error(transparent)]
    Napi(#[from] NapiError),
}

//! Runtime layer over the core model (dependency order):
//! - subscription: the single pub/sub primitive
//! - store: the four backing stores, plain data
//! - router: reference -> store classification
//! - resolver: index binding with cycle detection
//! - bus: fire-and-forget session events
//! - txn: buffered atomic writes
//! - engine: the facade tying it all together

pub mod bus;
pub mod engine;
pub mod resolver;
pub mod router;
pub mod store;
pub mod subscription;
pub mod txn;

pub use bus::{BusError, EventBus, EventKind, SessionEvent};
pub use engine::{Runtime, RuntimeError};
pub use resolver::{resolve, Resolution, ResolveError, ValueSource};
pub use store::{CachePolicy, NapiError, NapiRepository, StoreError};
pub use subscription::{BufferingPolicy, RecvError, Subscription};
pub use txn::Transaction;

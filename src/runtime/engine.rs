//! The runtime facade: one-shot reads, live queries, transactions and the
//! event bus behind a single cloneable handle.
//!
//! Locking discipline: `commit` serializes mutations and the notification
//! pass that follows each one; `state` is a read/write lock over the plain
//! store data; `queries` guards the live-query table. Writers take
//! commit -> state(write), then release state before notifying; notifiers
//! and subscribers take queries -> state(read). No lock is ever held while
//! delivering to a subscriber queue beyond the queries mutex itself, and
//! no lock at all is held while a provider repository runs: a provider may
//! block or re-enter the runtime without stalling commits or delivery.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use crate::core::{
    Category, Context, FetchError, FetchResult, Limits, Reference, Route, RouteError, StoreKind,
    Tag, TagGraph,
};

use super::bus::{BusError, EventBus, EventKind, SessionEvent};
use super::resolver::{resolve, ResolveError, ValueSource};
use super::router;
use super::store::{
    CachePolicy, LocalStore, NapiRegistration, NapiRegistry, NapiRepository, RemoteConfigStore,
    SessionStateStore, StoreError,
};
use super::subscription::{stream, BufferingPolicy, QueueSender, Subscription};
use super::txn::{PendingWrite, Transaction};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("live query limit reached ({limit})")]
    LiveQueryLimit { limit: usize },
    #[error("transaction exceeds {limit} operations")]
    TransactionTooLarge { limit: usize },
    #[error("`{domain}` cannot host a provider: {reason}")]
    InvalidDomain { domain: String, reason: String },
    #[error("`{reference}` is not remote configuration")]
    NotRemoteConfiguration { reference: String },
}

/// Plain store data behind the state lock. Every store is inert by itself;
/// all coordination lives out here.
#[derive(Default)]
struct State {
    session: SessionStateStore,
    remote: RemoteConfigStore,
    local: LocalStore,
    napi: NapiRegistry,
}

/// Resolver read seam over committed state.
///
/// Providers are not consulted during index resolution: an id must live in
/// the session, remote or local store to steer resolution.
struct StateSource<'a> {
    state: &'a State,
}

impl ValueSource for StateSource<'_> {
    fn current_value(&self, reference: &Reference) -> Option<Value> {
        match router::route(reference, &self.state.napi) {
            StoreKind::SessionState => self.state.session.get(reference).cloned(),
            StoreKind::RemoteConfig => self.state.remote.get(reference).cloned(),
            StoreKind::Local => Route::of(reference)
                .ok()
                .and_then(|route| self.state.local.get(&route).cloned()),
            StoreKind::Napi => None,
        }
    }
}

/// A provider read lifted out of [`evaluate`]: the repository runs only
/// once every runtime lock is released, so it may block or re-enter the
/// runtime. The cloned registration shares its cache with the registry.
struct ProviderCall {
    domain: Tag,
    registration: NapiRegistration,
    reference: Reference,
}

impl ProviderCall {
    fn run(self) -> FetchResult {
        match self.registration.fetch(&self.domain, &self.reference) {
            Ok(value) => FetchResult::value(value, StoreKind::Napi, self.reference),
            Err(err) => FetchResult::error(
                FetchError::Other(err.to_string()),
                Some(StoreKind::Napi),
                Some(self.reference),
            ),
        }
    }
}

enum Fetched {
    Ready(FetchResult),
    Pending(ProviderCall),
}

/// One full read: resolve, route, fetch. Alongside the result it reports
/// what the read depended on, which is exactly what a live query watches.
/// Provider-backed reads come back [`Fetched::Pending`]; the caller runs
/// them after dropping the state guard.
struct Evaluation {
    fetched: Fetched,
    watched: BTreeSet<Reference>,
    route: Option<Route>,
    kind: Option<StoreKind>,
}

impl Evaluation {
    fn into_parts(self) -> (FetchResult, BTreeSet<Reference>, Option<Route>, Option<StoreKind>) {
        let result = match self.fetched {
            Fetched::Ready(result) => result,
            Fetched::Pending(call) => call.run(),
        };
        (result, self.watched, self.route, self.kind)
    }
}

fn evaluate(state: &State, limits: &Limits, tag: &Tag, context: &Context) -> Evaluation {
    let resolution = resolve(limits, &StateSource { state }, tag, context, false);
    let mut watched: BTreeSet<Reference> = resolution.dependencies.into_iter().collect();
    let reference = match resolution.outcome {
        Ok(reference) => reference,
        Err(err) => {
            return Evaluation {
                fetched: Fetched::Ready(FetchResult::error(err.into_fetch(tag), None, None)),
                watched,
                route: None,
                kind: None,
            }
        }
    };
    let kind = router::route(&reference, &state.napi);
    let mut route = None;
    let fetched = match kind {
        StoreKind::SessionState => {
            watched.insert(reference.clone());
            match state.session.get(&reference) {
                Some(value) => Fetched::Ready(FetchResult::value(value.clone(), kind, reference)),
                None => Fetched::Ready(missing(kind, reference)),
            }
        }
        StoreKind::RemoteConfig => match state.remote.get(&reference) {
            Some(value) => Fetched::Ready(FetchResult::value(value.clone(), kind, reference)),
            None => Fetched::Ready(missing(kind, reference)),
        },
        StoreKind::Napi => match state.napi.owner(reference.tag()) {
            Some((domain, registration)) => Fetched::Pending(ProviderCall {
                domain: domain.clone(),
                registration: registration.clone(),
                reference,
            }),
            None => Fetched::Ready(missing(kind, reference)),
        },
        StoreKind::Local => match Route::of(&reference) {
            Ok(resolved) => {
                let result = match state.local.get(&resolved) {
                    Some(value) => FetchResult::value(value.clone(), kind, reference),
                    None => missing(kind, reference),
                };
                route = Some(resolved);
                Fetched::Ready(result)
            }
            Err(err) => Fetched::Ready(FetchResult::error(
                FetchError::InvalidReference {
                    reference: reference.to_string(),
                    reason: err.to_string(),
                },
                Some(kind),
                Some(reference),
            )),
        },
    };
    Evaluation {
        fetched,
        watched,
        route,
        kind: Some(kind),
    }
}

fn missing(kind: StoreKind, reference: Reference) -> FetchResult {
    FetchResult::error(
        FetchError::KeyDoesNotExist {
            reference: reference.to_string(),
            store: kind.as_str(),
        },
        Some(kind),
        Some(reference),
    )
}

struct LiveQuery {
    id: u64,
    tag: Tag,
    context: Context,
    sender: QueueSender<FetchResult>,
    watched: BTreeSet<Reference>,
    route: Option<Route>,
    kind: Option<StoreKind>,
    errored: bool,
    last: FetchResult,
}

impl LiveQuery {
    fn affected(&self, changes: &Changes) -> bool {
        if changes.session.iter().any(|r| self.watched.contains(r)) {
            return true;
        }
        if let Some(route) = &self.route {
            if changes.local.iter().any(|l| route.overlaps(l)) {
                return true;
            }
        }
        if changes.remote_moved && (self.kind == Some(StoreKind::RemoteConfig) || self.errored) {
            return true;
        }
        if changes.napi_moved {
            // A registration can claim a subtree that previously routed to
            // the local store, and can cure earlier failures.
            if matches!(self.kind, Some(StoreKind::Napi) | Some(StoreKind::Local)) || self.errored {
                return true;
            }
        }
        false
    }
}

/// What one commit changed, used to pick the queries worth re-evaluating.
#[derive(Default)]
struct Changes {
    session: Vec<Reference>,
    local: Vec<Route>,
    remote_moved: bool,
    napi_moved: bool,
}

impl Changes {
    fn is_empty(&self) -> bool {
        self.session.is_empty() && self.local.is_empty() && !self.remote_moved && !self.napi_moved
    }
}

/// A provider-backed re-evaluation carried out of the notification pass.
/// The call runs after every lock (including `commit`) is released, then
/// the outcome is delivered to the owning query by id.
struct DeferredProvider {
    query: u64,
    call: ProviderCall,
}

struct RuntimeInner {
    graph: TagGraph,
    limits: Limits,
    /// Serializes commits and the notification pass after each one, which
    /// is what makes emission order match commit order.
    commit: Mutex<()>,
    state: RwLock<State>,
    queries: Mutex<Vec<LiveQuery>>,
    query_seq: AtomicU64,
    bus: EventBus,
}

/// Cloneable handle to one namespace runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(graph: TagGraph, limits: Limits) -> Self {
        let bus = EventBus::new(limits.max_bus_subscribers);
        Self {
            inner: Arc::new(RuntimeInner {
                graph,
                limits,
                commit: Mutex::new(()),
                state: RwLock::new(State::default()),
                queries: Mutex::new(Vec::new()),
                query_seq: AtomicU64::new(0),
                bus,
            }),
        }
    }

    pub fn graph(&self) -> &TagGraph {
        &self.inner.graph
    }

    pub fn limits(&self) -> &Limits {
        &self.inner.limits
    }

    // ---- reads ----------------------------------------------------------

    /// One-shot read of the current value, with provenance.
    pub fn fetch(&self, tag: &Tag, context: &Context) -> FetchResult {
        let evaluation = {
            let state = read(&self.inner.state);
            evaluate(&state, &self.inner.limits, tag, context)
        };
        // Provider reads run here, after the state guard is gone.
        evaluation.into_parts().0
    }

    /// One-shot read decoded into the caller's type.
    pub fn get<T: DeserializeOwned>(&self, tag: &Tag, context: &Context) -> Result<T, FetchError> {
        self.fetch(tag, context).decode()
    }

    /// One-shot read that falls back to `default` on any failure.
    pub fn get_or<T: DeserializeOwned>(&self, tag: &Tag, context: &Context, default: T) -> T {
        self.get(tag, context).unwrap_or(default)
    }

    /// Wait until the location yields a decodable value.
    ///
    /// Error emissions do not end the wait; on timeout the last error seen
    /// is returned, so callers learn why the value never arrived.
    pub fn get_wait<T: DeserializeOwned>(
        &self,
        tag: &Tag,
        context: &Context,
        timeout: Duration,
    ) -> Result<T, FetchError> {
        let subscription = self
            .subscribe_query(tag.clone(), context.clone(), BufferingPolicy::Unbounded)
            .map_err(|err| FetchError::Other(err.to_string()))?;
        let deadline = Instant::now() + timeout;
        let mut last_err: Option<FetchError> = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(last_err.unwrap_or_else(|| {
                    FetchError::Other(format!("timed out waiting for `{tag}`"))
                }));
            }
            match subscription.recv_timeout(remaining) {
                Ok(result) if result.is_value() => return result.decode(),
                Ok(result) => last_err = result.as_error().cloned(),
                Err(_) => {
                    return Err(last_err.unwrap_or_else(|| {
                        FetchError::Other(format!("timed out waiting for `{tag}`"))
                    }))
                }
            }
        }
    }

    /// Live query that never drops an emission.
    ///
    /// The current outcome is delivered immediately, then one emission per
    /// observable change, de-duplicated against the previous outcome.
    pub fn publisher(
        &self,
        tag: &Tag,
        context: Context,
    ) -> Result<Subscription<FetchResult>, RuntimeError> {
        self.subscribe_query(tag.clone(), context, BufferingPolicy::Unbounded)
    }

    /// Live query buffered to the configured default; slow consumers keep
    /// only the newest emissions.
    pub fn stream(
        &self,
        tag: &Tag,
        context: Context,
    ) -> Result<Subscription<FetchResult>, RuntimeError> {
        let policy = BufferingPolicy::Newest(self.inner.limits.default_stream_buffer_events);
        self.subscribe_query(tag.clone(), context, policy)
    }

    /// Live query with an explicit buffering policy.
    pub fn stream_with(
        &self,
        tag: &Tag,
        context: Context,
        policy: BufferingPolicy,
    ) -> Result<Subscription<FetchResult>, RuntimeError> {
        self.subscribe_query(tag.clone(), context, policy)
    }

    fn subscribe_query(
        &self,
        tag: Tag,
        context: Context,
        policy: BufferingPolicy,
    ) -> Result<Subscription<FetchResult>, RuntimeError> {
        // The first evaluation may invoke a provider, so it happens before
        // the query table is locked and after the state guard is dropped.
        let evaluation = {
            let state = read(&self.inner.state);
            evaluate(&state, &self.inner.limits, &tag, &context)
        };
        let (result, watched, route, kind) = evaluation.into_parts();
        let mut queries = lock(&self.inner.queries);
        queries.retain(|q| !q.sender.is_disconnected());
        if queries.len() >= self.inner.limits.max_live_queries {
            return Err(RuntimeError::LiveQueryLimit {
                limit: self.inner.limits.max_live_queries,
            });
        }
        let (sender, subscription) = stream(policy);
        sender.send(result.clone());
        queries.push(LiveQuery {
            id: self.inner.query_seq.fetch_add(1, Ordering::Relaxed),
            tag,
            context,
            sender,
            watched,
            route,
            kind,
            errored: !result.is_value(),
            last: result,
        });
        Ok(subscription)
    }

    // ---- writes ---------------------------------------------------------

    /// Write one value (a single-operation transaction).
    pub fn set(&self, tag: &Tag, context: &Context, value: Value) -> Result<(), RuntimeError> {
        self.transaction(move |txn| txn.set(tag, context, value))
    }

    /// Remove one value (a single-operation transaction).
    pub fn clear(&self, tag: &Tag, context: &Context) -> Result<(), RuntimeError> {
        self.transaction(move |txn| txn.clear(tag, context))
    }

    /// Apply several writes under one context as a single transaction.
    /// `None` values are removals.
    pub fn batch<I>(&self, context: &Context, writes: I) -> Result<(), RuntimeError>
    where
        I: IntoIterator<Item = (Tag, Option<Value>)>,
    {
        self.transaction(move |txn| {
            for (tag, value) in writes {
                match value {
                    Some(value) => txn.set(&tag, context, value)?,
                    None => txn.clear(&tag, context)?,
                }
            }
            Ok(())
        })
    }

    /// Run a transaction body; its writes commit atomically, or not at all.
    pub fn transaction<F>(&self, body: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<(), RuntimeError>,
    {
        let mut txn = Transaction::new(self);
        body(&mut txn)?;
        self.commit(txn.into_ops())
    }

    /// Resolve and route one write target against committed state. Bare
    /// collection terminals are allowed; provider-owned targets are not.
    pub(crate) fn resolve_write(
        &self,
        tag: &Tag,
        context: &Context,
    ) -> Result<(Reference, StoreKind, Option<Route>), RuntimeError> {
        let state = read(&self.inner.state);
        let resolution = resolve(&self.inner.limits, &StateSource { state: &state }, tag, context, true);
        let reference = resolution.outcome?;
        let kind = router::route(&reference, &state.napi);
        match kind {
            StoreKind::Napi => Err(StoreError::UnsupportedWrite {
                kind: kind.as_str(),
            }
            .into()),
            StoreKind::Local => {
                let route = if reference.is_fully_bound() {
                    Route::of(&reference)?
                } else {
                    Route::of_collection(&reference)?
                };
                Ok((reference, kind, Some(route)))
            }
            StoreKind::SessionState | StoreKind::RemoteConfig => Ok((reference, kind, None)),
        }
    }

    /// Surface a write rejected before commit on the bus. Failed mutations
    /// are as observable as applied ones.
    pub(crate) fn post_write_failure(&self, tag: &Tag, context: &Context, err: &RuntimeError) {
        let failure = match err {
            RuntimeError::Resolve(err) => err.clone().into_fetch(tag),
            _ => FetchError::Other(err.to_string()),
        };
        debug!(tag = %tag, error = %err, "write rejected");
        self.inner.bus.post(SessionEvent::new(
            tag.clone(),
            None,
            context.clone(),
            EventKind::WriteFailed(failure),
        ));
    }

    pub(crate) fn commit(&self, ops: Vec<PendingWrite>) -> Result<(), RuntimeError> {
        if ops.is_empty() {
            return Ok(());
        }
        let deferred = self.commit_locked(ops)?;
        self.finish(deferred);
        Ok(())
    }

    fn commit_locked(&self, ops: Vec<PendingWrite>) -> Result<Vec<DeferredProvider>, RuntimeError> {
        let _commit = lock(&self.inner.commit);

        // Validate the whole batch before any store is touched.
        let mut expanded = Vec::with_capacity(ops.len());
        for op in &ops {
            match (&op.kind, &op.route) {
                (StoreKind::Local, Some(route)) => {
                    match LocalStore::expand(route, op.value.clone()) {
                        Ok(writes) => expanded.push(Some(writes)),
                        Err(err) => {
                            debug!(tag = %op.tag, error = %err, "transaction rejected");
                            self.inner.bus.post(SessionEvent::new(
                                op.tag.clone(),
                                Some(op.reference.clone()),
                                op.context.clone(),
                                EventKind::WriteFailed(FetchError::Other(err.to_string())),
                            ));
                            return Err(err.into());
                        }
                    }
                }
                _ => expanded.push(None),
            }
        }

        let mut changes = Changes::default();
        let mut events = Vec::new();
        {
            let mut state = write(&self.inner.state);
            for (op, writes) in ops.into_iter().zip(expanded) {
                let PendingWrite {
                    tag,
                    context,
                    reference,
                    kind,
                    route: _,
                    value,
                } = op;
                let changed = match kind {
                    StoreKind::SessionState => {
                        let changed = state.session.apply(&reference, value);
                        if changed {
                            changes.session.push(reference.clone());
                        }
                        changed
                    }
                    // Writes routed to remote configuration land in the
                    // override layer; the installed payload is read-only.
                    StoreKind::RemoteConfig => {
                        let changed = match value {
                            Some(value) => {
                                state.remote.set_override(reference.clone(), value);
                                true
                            }
                            None => state.remote.clear_override(&reference),
                        };
                        changes.remote_moved |= changed;
                        changed
                    }
                    StoreKind::Local => {
                        let routes = state.local.apply(writes.unwrap_or_default());
                        let changed = !routes.is_empty();
                        changes.local.extend(routes);
                        changed
                    }
                    // Rejected at issue time; nothing to apply.
                    StoreKind::Napi => false,
                };
                if changed {
                    events.push(SessionEvent::new(
                        tag,
                        Some(reference),
                        context,
                        EventKind::Written,
                    ));
                }
            }
        }
        trace!(
            session = changes.session.len(),
            local = changes.local.len(),
            "commit applied"
        );
        for event in events {
            self.inner.bus.post(event);
        }
        Ok(self.notify(&changes))
    }

    /// Re-evaluate affected live queries against the just-committed state
    /// and emit where the outcome moved. Runs under the commit lock, so
    /// provider-backed re-evaluations are handed back to the caller instead
    /// of being run here; [`Runtime::finish`] delivers them lock-free.
    #[must_use]
    fn notify(&self, changes: &Changes) -> Vec<DeferredProvider> {
        let mut deferred = Vec::new();
        if changes.is_empty() {
            return deferred;
        }
        let mut queries = lock(&self.inner.queries);
        if queries.is_empty() {
            return deferred;
        }
        let state = read(&self.inner.state);
        queries.retain_mut(|query| {
            if !query.affected(changes) {
                return true;
            }
            let evaluation = evaluate(&state, &self.inner.limits, &query.tag, &query.context);
            query.watched = evaluation.watched;
            query.route = evaluation.route;
            query.kind = evaluation.kind;
            match evaluation.fetched {
                Fetched::Ready(result) => {
                    query.errored = !result.is_value();
                    if result != query.last {
                        query.last = result.clone();
                        query.sender.send(result)
                    } else {
                        !query.sender.is_disconnected()
                    }
                }
                Fetched::Pending(call) => {
                    deferred.push(DeferredProvider {
                        query: query.id,
                        call,
                    });
                    !query.sender.is_disconnected()
                }
            }
        });
        deferred
    }

    /// Run the provider reads a notification pass collected, with no lock
    /// held, and deliver each outcome to its query. The query may have been
    /// dropped or re-evaluated in the meantime; delivery still de-dups
    /// against its latest emission.
    fn finish(&self, deferred: Vec<DeferredProvider>) {
        for DeferredProvider { query: id, call } in deferred {
            let result = call.run();
            let mut queries = lock(&self.inner.queries);
            if let Some(query) = queries.iter_mut().find(|q| q.id == id) {
                query.errored = !result.is_value();
                if result != query.last {
                    query.last = result.clone();
                    query.sender.send(result);
                }
            }
        }
    }

    // ---- providers and remote configuration -----------------------------

    /// Register (or replace) the provider owning a domain subtree.
    ///
    /// Only plain local subtrees can be claimed; the privileged categories
    /// are never provider-backed.
    pub fn register_napi(
        &self,
        domain: &Tag,
        repository: Arc<dyn NapiRepository>,
        policy: CachePolicy,
    ) -> Result<(), RuntimeError> {
        let reason = match domain.category() {
            Category::Local => None,
            Category::SessionState => Some("subtree is session state"),
            Category::RemoteConfig => Some("subtree is remote configuration"),
        };
        if let Some(reason) = reason {
            return Err(RuntimeError::InvalidDomain {
                domain: domain.path().to_string(),
                reason: reason.to_string(),
            });
        }
        let deferred = {
            let _commit = lock(&self.inner.commit);
            {
                let mut state = write(&self.inner.state);
                state.napi.register(domain.clone(), repository, policy);
            }
            debug!(domain = %domain, "provider registered");
            self.notify(&Changes {
                napi_moved: true,
                ..Changes::default()
            })
        };
        self.finish(deferred);
        Ok(())
    }

    /// Install a freshly fetched remote payload, replacing the previous
    /// one. Local overrides survive.
    pub fn install_remote_configuration(
        &self,
        payload: BTreeMap<Reference, Value>,
    ) -> Result<(), RuntimeError> {
        for reference in payload.keys() {
            self.require_remote(reference)?;
        }
        let deferred = {
            let _commit = lock(&self.inner.commit);
            {
                let mut state = write(&self.inner.state);
                state.remote.install(payload);
            }
            self.notify(&Changes {
                remote_moved: true,
                ..Changes::default()
            })
        };
        self.finish(deferred);
        Ok(())
    }

    pub fn set_remote_override(
        &self,
        reference: Reference,
        value: Value,
    ) -> Result<(), RuntimeError> {
        self.require_remote(&reference)?;
        let deferred = {
            let _commit = lock(&self.inner.commit);
            {
                let mut state = write(&self.inner.state);
                state.remote.set_override(reference, value);
            }
            self.notify(&Changes {
                remote_moved: true,
                ..Changes::default()
            })
        };
        self.finish(deferred);
        Ok(())
    }

    pub fn clear_remote_override(&self, reference: &Reference) -> Result<bool, RuntimeError> {
        self.require_remote(reference)?;
        let (removed, deferred) = {
            let _commit = lock(&self.inner.commit);
            let removed = {
                let mut state = write(&self.inner.state);
                state.remote.clear_override(reference)
            };
            let deferred = if removed {
                self.notify(&Changes {
                    remote_moved: true,
                    ..Changes::default()
                })
            } else {
                Vec::new()
            };
            (removed, deferred)
        };
        self.finish(deferred);
        Ok(removed)
    }

    fn require_remote(&self, reference: &Reference) -> Result<(), RuntimeError> {
        if reference.tag().category() != Category::RemoteConfig {
            return Err(RuntimeError::NotRemoteConfiguration {
                reference: reference.to_string(),
            });
        }
        Ok(())
    }

    // ---- events ---------------------------------------------------------

    /// Post a fire-and-forget event on a tag. Returns its sequence number.
    #[track_caller]
    pub fn post(&self, tag: &Tag, context: Context) -> u64 {
        self.inner
            .bus
            .post(SessionEvent::new(tag.clone(), None, context, EventKind::Posted))
    }

    /// Write the value at the event's tag, then post the event carrying
    /// the resolved reference. The write commits first, so a subscriber
    /// reacting to the event reads the new state.
    #[track_caller]
    pub fn post_value(
        &self,
        tag: &Tag,
        context: Context,
        value: Value,
    ) -> Result<u64, RuntimeError> {
        let (reference, _, _) = match self.resolve_write(tag, &context) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.post_write_failure(tag, &context, &err);
                return Err(err);
            }
        };
        self.set(tag, &context, value)?;
        Ok(self.inner.bus.post(SessionEvent::new(
            tag.clone(),
            Some(reference),
            context,
            EventKind::Posted,
        )))
    }

    /// Subscribe to events under the given tags (empty filter = all).
    pub fn on(&self, filter: Vec<Tag>) -> Result<Subscription<SessionEvent>, RuntimeError> {
        Ok(self.inner.bus.subscribe(filter, BufferingPolicy::Unbounded)?)
    }

    /// Subscribe with an explicit buffering policy for slow consumers.
    pub fn on_buffered(
        &self,
        filter: Vec<Tag>,
        policy: BufferingPolicy,
    ) -> Result<Subscription<SessionEvent>, RuntimeError> {
        Ok(self.inner.bus.subscribe(filter, policy)?)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match rw.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match rw.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

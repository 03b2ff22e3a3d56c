//! Session event bus: fire-and-forget events, decoupled from state.
//!
//! Events are ephemeral and carry no payload history; a subscriber sees
//! only what is posted after it subscribes. The runtime also posts write
//! lifecycle events here so observers can trace mutations without holding
//! any store lock.

use std::panic::Location;
use std::sync::Mutex;

use thiserror::Error;
use tracing::trace;

use crate::core::{Context, FetchError, Reference, Tag};

use super::subscription::{stream, BufferingPolicy, QueueSender, Subscription};

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum BusError {
    #[error("event bus is at its subscriber limit ({limit})")]
    SubscriberLimitReached { limit: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    /// Posted explicitly by a caller.
    Posted,
    /// A committed write changed the addressed location.
    Written,
    /// A write was attempted and rejected.
    WriteFailed(FetchError),
}

/// One event as delivered to subscribers.
#[derive(Clone, Debug)]
pub struct SessionEvent {
    pub tag: Tag,
    /// The resolved reference, when resolution succeeded.
    pub reference: Option<Reference>,
    pub context: Context,
    pub kind: EventKind,
    /// Source location of the originating call, for diagnostics.
    pub location: &'static Location<'static>,
    /// Bus-global monotonic sequence number, assigned at post time.
    pub seq: u64,
}

impl SessionEvent {
    #[track_caller]
    pub fn new(tag: Tag, reference: Option<Reference>, context: Context, kind: EventKind) -> Self {
        Self {
            tag,
            reference,
            context,
            kind,
            location: Location::caller(),
            seq: 0,
        }
    }
}

struct BusSubscriber {
    /// Empty filter means every event; otherwise the event tag must be the
    /// filter tag or a descendant of it.
    filter: Vec<Tag>,
    sender: QueueSender<SessionEvent>,
}

impl BusSubscriber {
    fn wants(&self, tag: &Tag) -> bool {
        self.filter.is_empty() || self.filter.iter().any(|f| tag.is_descendant_of(f))
    }
}

#[derive(Default)]
struct BusState {
    subscribers: Vec<BusSubscriber>,
    next_seq: u64,
}

/// Fan-out hub. Posting never blocks; dead subscribers are pruned as they
/// are discovered.
pub struct EventBus {
    state: Mutex<BusState>,
    max_subscribers: usize,
}

impl EventBus {
    pub fn new(max_subscribers: usize) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            max_subscribers,
        }
    }

    /// Subscribe with a tag filter (empty = all events).
    pub fn subscribe(
        &self,
        filter: Vec<Tag>,
        policy: BufferingPolicy,
    ) -> Result<Subscription<SessionEvent>, BusError> {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.sender.is_disconnected());
        if state.subscribers.len() >= self.max_subscribers {
            return Err(BusError::SubscriberLimitReached {
                limit: self.max_subscribers,
            });
        }
        let (sender, subscription) = stream(policy);
        state.subscribers.push(BusSubscriber { filter, sender });
        Ok(subscription)
    }

    /// Assign the sequence number and deliver to matching subscribers.
    pub fn post(&self, mut event: SessionEvent) -> u64 {
        let mut state = self.lock();
        event.seq = state.next_seq;
        state.next_seq += 1;
        trace!(tag = %event.tag, seq = event.seq, "bus post");
        state
            .subscribers
            .retain(|s| !s.wants(&event.tag) || s.sender.send(event.clone()));
        event.seq
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.sender.is_disconnected());
        state.subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TagGraph;

    fn graph() -> TagGraph {
        let mut b = TagGraph::builder("app").unwrap();
        b.node("app.auth.login").unwrap();
        b.node("app.auth.logout").unwrap();
        b.node("app.other.ping").unwrap();
        b.build()
    }

    fn event(g: &TagGraph, path: &str) -> SessionEvent {
        SessionEvent::new(
            g.tag(path).unwrap(),
            None,
            Context::new(),
            EventKind::Posted,
        )
    }

    #[test]
    fn filter_matches_descendants_and_self() {
        let g = graph();
        let bus = EventBus::new(8);
        let auth = bus
            .subscribe(vec![g.tag("app.auth").unwrap()], BufferingPolicy::Unbounded)
            .unwrap();
        let all = bus.subscribe(vec![], BufferingPolicy::Unbounded).unwrap();

        bus.post(event(&g, "app.auth.login"));
        bus.post(event(&g, "app.other.ping"));
        bus.post(event(&g, "app.auth.logout"));

        assert_eq!(auth.try_recv().unwrap().tag.path(), "app.auth.login");
        assert_eq!(auth.try_recv().unwrap().tag.path(), "app.auth.logout");
        assert!(auth.try_recv().is_err());

        let seqs: Vec<u64> = (0..3).map(|_| all.try_recv().unwrap().seq).collect();
        assert_eq!(seqs, [0, 1, 2]);
    }

    #[test]
    fn no_replay_for_late_subscribers() {
        let g = graph();
        let bus = EventBus::new(8);
        bus.post(event(&g, "app.auth.login"));
        let late = bus.subscribe(vec![], BufferingPolicy::Unbounded).unwrap();
        assert!(late.try_recv().is_err());
        bus.post(event(&g, "app.auth.logout"));
        assert_eq!(late.try_recv().unwrap().tag.path(), "app.auth.logout");
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let g = graph();
        let bus = EventBus::new(8);
        let sub = bus.subscribe(vec![], BufferingPolicy::Unbounded).unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        bus.post(event(&g, "app.auth.login"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_limit_is_enforced() {
        let bus = EventBus::new(1);
        let _keep = bus.subscribe(vec![], BufferingPolicy::Unbounded).unwrap();
        let err = bus.subscribe(vec![], BufferingPolicy::Unbounded).unwrap_err();
        assert!(matches!(err, BusError::SubscriberLimitReached { limit: 1 }));
    }

    #[test]
    fn slow_subscriber_loses_oldest_only() {
        let g = graph();
        let bus = EventBus::new(8);
        let sub = bus.subscribe(vec![], BufferingPolicy::Newest(2)).unwrap();
        for _ in 0..5 {
            bus.post(event(&g, "app.auth.login"));
        }
        assert_eq!(sub.try_recv().unwrap().seq, 3);
        assert_eq!(sub.try_recv().unwrap().seq, 4);
        assert_eq!(sub.dropped(), 3);
    }
}

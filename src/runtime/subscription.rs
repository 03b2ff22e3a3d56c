//! The one subscription primitive behind every stream in the runtime.
//!
//! A publisher side pushes into a policy-bounded queue and signals the
//! subscriber through a coalescing wakeup channel; the subscriber pulls.
//! Publishing never blocks: slow consumers lose the oldest buffered items
//! per their own policy, and the loss is accounted for.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use thiserror::Error;

/// Per-subscriber buffering policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferingPolicy {
    /// Buffer everything; the subscriber is trusted to keep up.
    Unbounded,
    /// Keep only the newest `n` items, dropping the oldest on overflow.
    Newest(usize),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecvError {
    #[error("publisher disconnected")]
    Disconnected,
    #[error("timed out waiting for an emission")]
    Timeout,
    #[error("no emission buffered")]
    Empty,
}

struct Queue<T> {
    items: VecDeque<T>,
    policy: BufferingPolicy,
    dropped: u64,
}

struct Shared<T> {
    queue: Mutex<Queue<T>>,
}

/// Publisher half. Cloneable; the subscription sees `Disconnected` once all
/// clones are gone and the buffer is drained.
pub struct QueueSender<T> {
    shared: Arc<Shared<T>>,
    signal: Sender<()>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            signal: self.signal.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Push one item. Returns false when the subscriber is gone, so callers
    /// can prune dead subscriptions.
    pub fn send(&self, item: T) -> bool {
        {
            let mut queue = match self.shared.queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            queue.items.push_back(item);
            if let BufferingPolicy::Newest(max) = queue.policy {
                while queue.items.len() > max.max(1) {
                    queue.items.pop_front();
                    queue.dropped = queue.dropped.saturating_add(1);
                }
            }
        }
        match self.signal.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(
            self.signal.try_send(()),
            Err(TrySendError::Disconnected(()))
        )
    }
}

/// Subscriber half of the primitive: a pull-based stream of emissions.
pub struct Subscription<T> {
    shared: Arc<Shared<T>>,
    signal: Receiver<()>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl<T> Subscription<T> {
    /// Block until the next emission.
    pub fn recv(&self) -> Result<T, RecvError> {
        loop {
            if let Some(item) = self.pop() {
                return Ok(item);
            }
            if self.signal.recv().is_err() {
                // Publisher gone; drain whatever is left.
                return self.pop().ok_or(RecvError::Disconnected);
            }
        }
    }

    /// Block until the next emission or the deadline passes.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.pop() {
                return Ok(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RecvError::Timeout);
            }
            match self.signal.recv_timeout(remaining) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return self.pop().ok_or(RecvError::Timeout);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return self.pop().ok_or(RecvError::Disconnected);
                }
            }
        }
    }

    pub fn try_recv(&self) -> Result<T, RecvError> {
        if let Some(item) = self.pop() {
            return Ok(item);
        }
        match self.signal.try_recv() {
            Ok(()) => self.pop().ok_or(RecvError::Empty),
            Err(TryRecvError::Empty) => Err(RecvError::Empty),
            Err(TryRecvError::Disconnected) => Err(RecvError::Disconnected),
        }
    }

    /// Items lost to this subscriber's own buffering policy.
    pub fn dropped(&self) -> u64 {
        match self.shared.queue.lock() {
            Ok(queue) => queue.dropped,
            Err(poisoned) => poisoned.into_inner().dropped,
        }
    }

    fn pop(&self) -> Option<T> {
        let mut queue = match self.shared.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.items.pop_front()
    }
}

/// Create a connected publisher/subscriber pair.
pub fn stream<T>(policy: BufferingPolicy) -> (QueueSender<T>, Subscription<T>) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(Queue {
            items: VecDeque::new(),
            policy,
            dropped: 0,
        }),
    });
    // Coalescing wakeup: one pending signal is enough.
    let (signal_tx, signal_rx) = channel::bounded(1);
    (
        QueueSender {
            shared: Arc::clone(&shared),
            signal: signal_tx,
        },
        Subscription {
            shared,
            signal: signal_rx,
        },
    )
}

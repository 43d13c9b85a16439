//! Bounded in-memory event store.
//!
//! The store is a fixed-capacity ring: once full, every insertion evicts the
//! oldest event and bumps the dropped counter. Cursors start at 1 and are never
//! reused, so readers can page and resume across evictions.
//!
//! One mutex guards the ring, the cursor counter and the listener list.
//! Listeners run synchronously inside [`EventStore::add`] while that lock is
//! held; they must be quick and must not call back into the store.

use super::types::{CaptureEvent, StoredEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// Upper bound on events returned by a single query.
pub const MAX_QUERY_LIMIT: usize = 50_000;

type Listener = Arc<dyn Fn(&Arc<StoredEvent>) + Send + Sync>;

/// Cursor and time constraints shared by paginated queries and statistics.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub since_cursor: Option<u64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl EventQuery {
    /// Whether an event passes the cursor floor and the time window.
    pub fn admits(&self, event: &StoredEvent) -> bool {
        if let Some(since) = self.since_cursor {
            if event.cursor < since {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.ts < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.ts > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub events: Vec<Arc<StoredEvent>>,
    pub next_cursor: u64,
    pub dropped_total: u64,
}

struct Ring {
    events: VecDeque<Arc<StoredEvent>>,
    next_cursor: u64,
    dropped: u64,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

pub struct EventStore {
    capacity: usize,
    inner: Mutex<Ring>,
}

impl EventStore {
    pub fn new(max_events: usize) -> Self {
        let capacity = max_events.max(1);
        Self {
            capacity,
            inner: Mutex::new(Ring {
                events: VecDeque::with_capacity(capacity),
                next_cursor: 1,
                dropped: 0,
                listeners: Vec::new(),
                next_listener_id: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cursor the next inserted event will receive.
    pub fn next_cursor(&self) -> u64 {
        self.inner.lock().next_cursor
    }

    pub fn dropped_total(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Inserts an event, evicting the oldest one when full, and notifies every
    /// listener in registration order before returning.
    pub fn add(&self, event: CaptureEvent) -> Arc<StoredEvent> {
        let mut ring = self.inner.lock();

        let stored = Arc::new(StoredEvent {
            cursor: ring.next_cursor,
            event,
        });
        ring.next_cursor += 1;

        if ring.events.len() >= self.capacity {
            ring.events.pop_front();
            ring.dropped += 1;
        }
        ring.events.push_back(stored.clone());

        for (_, listener) in &ring.listeners {
            listener(&stored);
        }

        stored
    }

    /// Scans oldest to newest and returns up to `query.limit` events that pass
    /// both the query constraints and `matches`.
    pub fn query<F>(&self, query: &EventQuery, matches: F) -> QueryResult
    where
        F: Fn(&CaptureEvent) -> bool,
    {
        let limit = query.limit.min(MAX_QUERY_LIMIT);
        let ring = self.inner.lock();

        let mut events = Vec::new();
        if limit > 0 {
            for event in &ring.events {
                if !query.admits(event) || !matches(&event.event) {
                    continue;
                }
                events.push(event.clone());
                if events.len() >= limit {
                    break;
                }
            }
        }

        let next_cursor = match events.last() {
            Some(last) => last.cursor + 1,
            None => query.since_cursor.unwrap_or(ring.next_cursor),
        };

        QueryResult {
            events,
            next_cursor,
            dropped_total: ring.dropped,
        }
    }

    /// Snapshot of every retained event, oldest first.
    pub fn all(&self) -> Vec<Arc<StoredEvent>> {
        self.inner.lock().events.iter().cloned().collect()
    }

    /// Registers a listener for every future [`add`](Self::add). The listener
    /// stays registered until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&Arc<StoredEvent>) + Send + Sync + 'static,
    {
        let mut ring = self.inner.lock();
        let id = ring.next_listener_id;
        ring.next_listener_id += 1;
        ring.listeners.push((id, Arc::new(listener)));

        Subscription {
            store: Arc::downgrade(self),
            id: Some(id),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    fn remove_listener(&self, id: u64) {
        self.inner.lock().listeners.retain(|(lid, _)| *lid != id);
    }
}

/// Live listener registration; unsubscribes on drop.
pub struct Subscription {
    store: Weak<EventStore>,
    id: Option<u64>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(store) = self.store.upgrade() {
                store.remove_listener(id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

//! Session lifecycle events published by packet readers
//!
//! Observers register a callback with an [`EventBus`] and get a
//! [`SubscriptionId`] back. [`EventBus::unsubscribe`] is synchronous: once it
//! returns, the callback is not running and will never run again.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use pitlane::events::{EventBus, EventKind, ReaderEvent};
//! use pitlane::types::CoverageCursorInfo;
//!
//! let bus = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let id = bus.subscribe(EventKind::CoverageCursorReceived, move |_event| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! bus.publish(&ReaderEvent::CoverageCursorReceived(CoverageCursorInfo { coverage_cursor_time: 5 }));
//! assert!(bus.unsubscribe(id));
//! bus.publish(&ReaderEvent::CoverageCursorReceived(CoverageCursorInfo { coverage_cursor_time: 6 }));
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::types::{CoverageCursorInfo, SessionAssociationInfo, SessionInfo, StreamInfo};

/// Notification derived by a reader from the packets and cursors it receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    SessionReadingStarted(SessionInfo),
    SessionReadingCompleted(SessionInfo),
    StreamReadingStarted(StreamInfo),
    StreamReadingCompleted(StreamInfo),
    SessionInfoUpdated(SessionInfo),
    CoverageCursorReceived(CoverageCursorInfo),
    SessionAssociationUpdated(SessionAssociationInfo),
}

/// Discriminant of [`ReaderEvent`], used to select events when subscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionReadingStarted,
    SessionReadingCompleted,
    StreamReadingStarted,
    StreamReadingCompleted,
    SessionInfoUpdated,
    CoverageCursorReceived,
    SessionAssociationUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::SessionReadingStarted,
        EventKind::SessionReadingCompleted,
        EventKind::StreamReadingStarted,
        EventKind::StreamReadingCompleted,
        EventKind::SessionInfoUpdated,
        EventKind::CoverageCursorReceived,
        EventKind::SessionAssociationUpdated,
    ];
}

impl ReaderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ReaderEvent::SessionReadingStarted(_) => EventKind::SessionReadingStarted,
            ReaderEvent::SessionReadingCompleted(_) => EventKind::SessionReadingCompleted,
            ReaderEvent::StreamReadingStarted(_) => EventKind::StreamReadingStarted,
            ReaderEvent::StreamReadingCompleted(_) => EventKind::StreamReadingCompleted,
            ReaderEvent::SessionInfoUpdated(_) => EventKind::SessionInfoUpdated,
            ReaderEvent::CoverageCursorReceived(_) => EventKind::CoverageCursorReceived,
            ReaderEvent::SessionAssociationUpdated(_) => EventKind::SessionAssociationUpdated,
        }
    }
}

/// Handle identifying one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ReaderEvent) + Send + Sync>;

struct Observer {
    id: SubscriptionId,
    kind: Option<EventKind>,
    callback: Callback,
}

/// Registry of event observers.
///
/// Callbacks run on the publishing task while the registry is read-locked, so
/// [`unsubscribe`](Self::unsubscribe) blocks until in-flight callbacks finish.
/// A callback must not subscribe or unsubscribe on the bus that invoked it.
pub struct EventBus {
    observers: RwLock<Vec<Observer>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { observers: RwLock::new(Vec::new()), next_id: AtomicU64::new(1) }
    }

    /// Register `callback` for events of one kind.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ReaderEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(callback))
    }

    /// Register `callback` for every event.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ReaderEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(callback))
    }

    fn register(&self, kind: Option<EventKind>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().push(Observer { id, kind, callback });
        debug!("Observer {:?} subscribed to {:?}", id, kind);
        id
    }

    /// Remove an observer. Returns `false` if `id` was not registered.
    ///
    /// Waits for any dispatch in progress; the callback never runs after this returns.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.write();
        let before = observers.len();
        observers.retain(|observer| observer.id != id);
        let removed = observers.len() != before;
        if removed {
            debug!("Observer {:?} unsubscribed", id);
        }
        removed
    }

    /// Deliver an event to every observer registered for its kind.
    pub fn publish(&self, event: &ReaderEvent) {
        let kind = event.kind();
        for observer in self.read().iter() {
            if observer.kind.is_none_or(|k| k == kind) {
                (observer.callback)(event);
            }
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Observer>> {
        // A panicking callback must not disable the bus
        self.observers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Observer>> {
        self.observers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Observer logging every reader event.
///
/// Subscribes one callback per event kind on creation and removes them in
/// [`unsubscribe_from_events`](Self::unsubscribe_from_events) or on drop.
pub struct SessionNotifier {
    bus: Arc<EventBus>,
    subscriptions: Vec<SubscriptionId>,
}

impl SessionNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        let subscriptions = EventKind::ALL
            .iter()
            .map(|&kind| bus.subscribe(kind, log_event))
            .collect();
        Self { bus, subscriptions }
    }

    /// Whether the notifier still holds subscriptions.
    pub fn is_subscribed(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Remove every subscription made by this notifier.
    pub fn unsubscribe_from_events(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

impl Drop for SessionNotifier {
    fn drop(&mut self) {
        self.unsubscribe_from_events();
    }
}

fn log_event(event: &ReaderEvent) {
    match event {
        ReaderEvent::SessionReadingStarted(session) => info!(
            "Session reading started for session {} with session key {}",
            session.identifier, session.session_key
        ),
        ReaderEvent::SessionReadingCompleted(session) => info!(
            "Session reading completed for session {} with session key {}",
            session.identifier, session.session_key
        ),
        ReaderEvent::StreamReadingStarted(stream) => info!(
            "Stream reading started for session key {} with stream name '{}'",
            stream.session_key, stream.stream
        ),
        ReaderEvent::StreamReadingCompleted(stream) => info!(
            "Stream reading completed for session key {} with stream name '{}'",
            stream.session_key, stream.stream
        ),
        ReaderEvent::SessionInfoUpdated(session) => info!("Session info updated to {:?}", session),
        ReaderEvent::CoverageCursorReceived(cursor) => info!(
            "Coverage cursor received with new timestamp at {}",
            cursor.coverage_cursor_time
        ),
        ReaderEvent::SessionAssociationUpdated(association) => {
            info!("Session association updated to {:?}", association)
        }
    }
}

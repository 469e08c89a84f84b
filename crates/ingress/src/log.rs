//! The append-only event log.

use chrono::{DateTime, Utc};
use hearth_core::bus::{Diagnostic, DiagnosticBus};
use hearth_core::error::IngressError;
use hearth_core::event::{Event, NewEvent};
use hearth_core::ids::EventId;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receiving end of the ingress notification feed.
pub type EventFeed = mpsc::UnboundedReceiver<Arc<Event>>;

type OrderKey = (DateTime<Utc>, u64);

#[derive(Default)]
struct LogState {
    next_sequence: u64,
    ordered: BTreeMap<OrderKey, Arc<Event>>,
    index: HashMap<EventId, OrderKey>,
}

/// Append-only, totally ordered log of everything that happened in the home.
///
/// `submit` never blocks on consumers: the critical section only assigns the
/// sequence and inserts, and the feed is unbounded.
pub struct EventLog {
    state: Mutex<LogState>,
    feed: mpsc::UnboundedSender<Arc<Event>>,
    closed: AtomicBool,
    diagnostics: Arc<DiagnosticBus>,
}

impl EventLog {
    /// Create a log and the feed the runtime consumes.
    pub fn new(diagnostics: Arc<DiagnosticBus>) -> (Self, EventFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Self {
            state: Mutex::new(LogState::default()),
            feed: tx,
            closed: AtomicBool::new(false),
            diagnostics,
        };
        (log, rx)
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        // A panic while holding the lock cannot leave a half-inserted event
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate and append an event. Returns the id assigned to it.
    pub fn submit(&self, event: NewEvent) -> Result<EventId, IngressError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IngressError::Closed);
        }

        if let Err(e) = event.payload.validate() {
            warn!(source = %event.payload.source(), producer = %event.provenance.producer, error = %e, "Rejected event");
            self.diagnostics.publish(Diagnostic::EventRejected {
                source: event.payload.source(),
                reason: e.to_string(),
                timestamp: Utc::now(),
            });
            return Err(e);
        }

        let stored = {
            let mut state = self.state();
            let sequence = state.next_sequence;
            state.next_sequence += 1;

            let stored = Arc::new(Event {
                id: EventId::new(),
                sequence,
                timestamp: event.timestamp,
                provenance: event.provenance,
                payload: event.payload,
            });
            let key = stored.order_key();
            state.index.insert(stored.id, key);
            state.ordered.insert(key, stored.clone());
            stored
        };

        debug!(
            event_id = %stored.id,
            sequence = stored.sequence,
            source = %stored.source(),
            "Event appended"
        );

        if self.feed.send(stored.clone()).is_err() {
            debug!(event_id = %stored.id, "Ingress feed has no consumer");
        }

        Ok(stored.id)
    }

    /// Stop accepting new events. Already appended events stay queryable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn get(&self, id: EventId) -> Option<Arc<Event>> {
        let state = self.state();
        let key = state.index.get(&id)?;
        state.ordered.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events strictly before `before` and no older than `window` relative
    /// to it. The newest `limit` are returned, oldest first.
    pub fn recent(
        &self,
        before: &Event,
        window: chrono::Duration,
        limit: usize,
    ) -> Vec<Arc<Event>> {
        let floor = before.timestamp - window;
        let state = self.state();
        let mut newest: Vec<Arc<Event>> = state
            .ordered
            .range(..before.order_key())
            .rev()
            .take_while(|(key, _)| key.0 >= floor)
            .take(limit)
            .map(|(_, event)| event.clone())
            .collect();
        newest.reverse();
        newest
    }

    /// Events whose sequence is greater than `sequence`, in log order.
    pub fn since(&self, sequence: u64) -> Vec<Arc<Event>> {
        self.state()
            .ordered
            .values()
            .filter(|e| e.sequence > sequence)
            .cloned()
            .collect()
    }
}

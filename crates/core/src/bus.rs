//! Diagnostic bus: decoupled observation of the orchestration core.
//!
//! Components publish what happened (retries, terminal action states,
//! pipeline failures) and observers such as the CLI or tests subscribe
//! without the components knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::event::EventSource;
use crate::ids::{ActionId, EventId, IntentId};
use crate::intent::ActionState;

/// All diagnostic events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Diagnostic {
    /// A producer submitted an event that failed validation
    EventRejected {
        source: EventSource,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// One reasoning attempt failed or timed out
    ReasoningAttemptFailed {
        trigger: EventId,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Reasoning produced an intent
    IntentProduced {
        trigger: EventId,
        intent: IntentId,
        actions: usize,
        fallback: bool,
        timestamp: DateTime<Utc>,
    },

    /// One device dispatch attempt failed or timed out
    ActionAttemptFailed {
        action_id: ActionId,
        device: String,
        attempt: u32,
        timed_out: bool,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A device action reached a terminal state
    ActionFinished {
        action_id: ActionId,
        device: String,
        capability: String,
        state: String,
        outcome: ActionState,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Processing of one event failed
    PipelineFailed {
        trigger: EventId,
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based bus for diagnostics.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct DiagnosticBus {
    sender: broadcast::Sender<Arc<Diagnostic>>,
}

impl DiagnosticBus {
    /// Create a new bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a diagnostic to all subscribers.
    pub fn publish(&self, diagnostic: Diagnostic) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(diagnostic));
    }

    /// Subscribe to receive diagnostics.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Diagnostic>> {
        self.sender.subscribe()
    }
}

impl Default for DiagnosticBus {
    fn default() -> Self {
        Self::new(256)
    }
}

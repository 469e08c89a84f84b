//! Action lifecycle records.

use chrono::{DateTime, Utc};
use hearth_core::error::ActionError;
use hearth_core::intent::{ActionState, DeviceAction, Priority};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Acknowledged,
    Failed(String),
    TimedOut,
}

/// One dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// The full history of one device action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: DeviceAction,
    pub priority: Priority,
    pub state: ActionState,
    pub attempts: Vec<AttemptRecord>,
    /// Why the action was rejected, superseded or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionRecord {
    pub fn new(action: DeviceAction, priority: Priority) -> Self {
        Self {
            action,
            priority,
            state: ActionState::Pending,
            attempts: Vec::new(),
            reason: None,
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn failed_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome != AttemptOutcome::Acknowledged)
            .count()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.state == ActionState::Acknowledged
    }

    /// `Err` when the action was rejected or ran out of attempts.
    /// Superseded and cancelled actions are not errors.
    pub fn as_result(&self) -> Result<&Self, ActionError> {
        match self.state {
            ActionState::Failed | ActionState::TimedOut => Err(ActionError::ActionFailed {
                action_id: self.action.id,
                device: self.action.device.clone(),
                attempts: self.attempt_count(),
                reason: self
                    .reason
                    .clone()
                    .unwrap_or_else(|| self.state.as_str().to_string()),
            }),
            ActionState::Rejected => Err(ActionError::Rejected {
                action_id: self.action.id,
                reason: self.reason.clone().unwrap_or_default(),
            }),
            _ => Ok(self),
        }
    }
}

/// Resolves to the action's terminal record.
pub struct ActionHandle {
    record: ActionRecord,
    rx: oneshot::Receiver<ActionRecord>,
}

impl ActionHandle {
    pub(crate) fn new(record: ActionRecord, rx: oneshot::Receiver<ActionRecord>) -> Self {
        Self { record, rx }
    }

    pub fn action(&self) -> &DeviceAction {
        &self.record.action
    }

    /// Wait for the terminal record.
    pub async fn outcome(self) -> ActionRecord {
        match self.rx.await {
            Ok(record) => record,
            Err(_) => {
                // The lane task went away without reporting
                let mut record = self.record;
                record.state = ActionState::Cancelled;
                record.reason = Some("orchestrator shut down".into());
                record.finished_at = Some(Utc::now());
                record
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::ids::{EventId, IntentId};

    #[tokio::test]
    async fn dropped_sender_reports_cancelled() {
        let action = DeviceAction::new("fan", "power", "on", IntentId::new(), EventId::new());
        let record = ActionRecord::new(action, Priority::User);
        let (tx, rx) = oneshot::channel();
        let handle = ActionHandle::new(record, rx);
        drop(tx);
        let outcome = handle.outcome().await;
        assert_eq!(outcome.state, ActionState::Cancelled);
    }

    #[test]
    fn counts_failed_attempts() {
        let action = DeviceAction::new("fan", "power", "on", IntentId::new(), EventId::new());
        let mut record = ActionRecord::new(action, Priority::User);
        let now = Utc::now();
        for outcome in [
            AttemptOutcome::Failed("unreachable".into()),
            AttemptOutcome::TimedOut,
            AttemptOutcome::Acknowledged,
        ] {
            let number = record.attempt_count() + 1;
            record.attempts.push(AttemptRecord {
                number,
                started_at: now,
                finished_at: now,
                outcome,
            });
        }
        assert_eq!(record.attempt_count(), 3);
        assert_eq!(record.failed_attempts(), 2);
    }

    #[test]
    fn exhausted_action_is_an_action_failed_error() {
        let action = DeviceAction::new("fan", "power", "on", IntentId::new(), EventId::new());
        let mut record = ActionRecord::new(action, Priority::User);
        record.state = ActionState::TimedOut;
        let now = Utc::now();
        record.attempts.push(AttemptRecord {
            number: 1,
            started_at: now,
            finished_at: now,
            outcome: AttemptOutcome::TimedOut,
        });

        match record.as_result() {
            Err(ActionError::ActionFailed { device, attempts, reason, .. }) => {
                assert_eq!(device, "fan");
                assert_eq!(attempts, 1);
                assert_eq!(reason, "timed_out");
            }
            other => panic!("expected ActionFailed, got {other:?}"),
        }

        record.state = ActionState::Rejected;
        record.reason = Some("unknown device".into());
        assert!(matches!(record.as_result(), Err(ActionError::Rejected { .. })));

        record.state = ActionState::Superseded;
        assert!(record.as_result().is_ok());
    }
}

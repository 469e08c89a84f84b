//! Portfolio updater: folds outcomes back into the user model.
//!
//! Writers anywhere in the runtime send jobs over a channel; a single task
//! applies them to the portfolio in submission order. Keys written:
//!
//! | key                                   | written on                     |
//! |---------------------------------------|--------------------------------|
//! | `interaction.last_utterance` / `last_reply` | every answered utterance |
//! | `device.<id>.<capability>`            | acknowledged action            |
//! | `device.<id>.<capability>.<state>.last_at` | acknowledged action       |
//! | `habit.<id>.<capability>.<state>.hHH` | acknowledged user action       |
//! | `routine.<id>.<capability>.<state>`   | habit seen often enough        |
//! | `device.<id>.last_failure`            | failed or timed-out action     |
//! | `presence.state` / `presence.zone`    | presence events                |
//! | `system.last_failure`                 | pipeline failures              |

use chrono::{DateTime, Local, Timelike, Utc};
use hearth_config::PortfolioConfig;
use hearth_core::error::PortfolioError;
use hearth_core::event::{Event, EventPayload, PresenceSignal};
use hearth_core::ids::EventId;
use hearth_core::intent::{ActionState, Intent, Priority};
use hearth_core::portfolio::{PortfolioEntry, PortfolioStore, UpsertMode};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::orchestrator::ActionRecord;

const DEFAULT_HABIT_THRESHOLD: u32 = 3;

enum UpdateJob {
    Interaction {
        trigger: EventId,
        utterance: String,
        confidence: f32,
        reply: Option<String>,
        at: DateTime<Utc>,
    },
    Action(ActionRecord),
    Presence {
        trigger: EventId,
        signal: PresenceSignal,
        at: DateTime<Utc>,
    },
    Failure {
        trigger: EventId,
        context: String,
        error: String,
        at: DateTime<Utc>,
    },
    Flush(oneshot::Sender<()>),
}

/// Cheap, cloneable sender side of the updater.
#[derive(Clone)]
pub struct UpdaterHandle {
    tx: mpsc::UnboundedSender<UpdateJob>,
}

impl UpdaterHandle {
    fn send(&self, job: UpdateJob) {
        if self.tx.send(job).is_err() {
            debug!("Portfolio updater stopped; dropping update");
        }
    }

    /// Remember what the user said and what Hearth answered.
    pub fn record_interaction(&self, event: &Event, intent: &Intent) {
        let EventPayload::Speech(transcript) = &event.payload else {
            return;
        };
        self.send(UpdateJob::Interaction {
            trigger: event.id,
            utterance: transcript.text.trim().to_string(),
            confidence: transcript.confidence,
            reply: intent.reply.clone(),
            at: event.timestamp,
        });
    }

    pub fn record_action(&self, record: ActionRecord) {
        self.send(UpdateJob::Action(record));
    }

    pub fn record_presence(&self, event: &Event) {
        let EventPayload::Presence(signal) = &event.payload else {
            return;
        };
        self.send(UpdateJob::Presence {
            trigger: event.id,
            signal: signal.clone(),
            at: event.timestamp,
        });
    }

    pub fn record_failure(&self, trigger: EventId, context: &str, error: &str) {
        self.send(UpdateJob::Failure {
            trigger,
            context: context.to_string(),
            error: error.to_string(),
            at: Utc::now(),
        });
    }

    /// Wait until every update sent before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(UpdateJob::Flush(tx));
        let _ = rx.await;
    }
}

/// Lowercase a name into a valid key segment.
fn segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

pub struct PortfolioUpdater {
    store: Arc<dyn PortfolioStore>,
    habit_threshold: u32,
}

impl PortfolioUpdater {
    pub fn new(store: Arc<dyn PortfolioStore>) -> Self {
        Self {
            store,
            habit_threshold: DEFAULT_HABIT_THRESHOLD,
        }
    }

    pub fn from_config(store: Arc<dyn PortfolioStore>, config: &PortfolioConfig) -> Self {
        Self::new(store).with_habit_threshold(config.habit_threshold)
    }

    pub fn with_habit_threshold(mut self, threshold: u32) -> Self {
        self.habit_threshold = threshold.max(1);
        self
    }

    /// Start the update task. It ends once every handle is dropped.
    pub fn spawn(self) -> (UpdaterHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                self.apply(job).await;
            }
            debug!("Portfolio updater finished");
        });
        (UpdaterHandle { tx }, task)
    }

    async fn apply(&self, job: UpdateJob) {
        match job {
            UpdateJob::Interaction {
                trigger,
                utterance,
                confidence,
                reply,
                at,
            } => {
                let entry = PortfolioEntry::new("interaction.last_utterance", json!(utterance), at, trigger)
                    .with_confidence(confidence);
                self.write(entry).await;
                if let Some(reply) = reply {
                    self.write(PortfolioEntry::new("interaction.last_reply", json!(reply), at, trigger))
                        .await;
                }
            }
            UpdateJob::Action(record) => self.apply_action(record).await,
            UpdateJob::Presence {
                trigger,
                signal,
                at,
            } => {
                self.write(PortfolioEntry::new(
                    "presence.state",
                    json!(signal.state.as_str()),
                    at,
                    trigger,
                ))
                .await;
                if let Some(zone) = signal.zone {
                    self.write(PortfolioEntry::new("presence.zone", json!(zone), at, trigger))
                        .await;
                }
            }
            UpdateJob::Failure {
                trigger,
                context,
                error,
                at,
            } => {
                let value = json!({ "context": context, "error": error });
                self.write(PortfolioEntry::new("system.last_failure", value, at, trigger))
                    .await;
            }
            UpdateJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    async fn apply_action(&self, record: ActionRecord) {
        let action = &record.action;
        let at = record.finished_at.unwrap_or_else(Utc::now);
        let device = segment(&action.device);
        let capability = segment(&action.capability);
        let state = segment(&action.state);
        let trigger = action.trigger;

        match record.state {
            ActionState::Acknowledged => {
                self.write(PortfolioEntry::new(
                    format!("device.{device}.{capability}"),
                    json!(action.state),
                    at,
                    trigger,
                ))
                .await;
                self.write(PortfolioEntry::new(
                    format!("device.{device}.{capability}.{state}.last_at"),
                    json!(at.to_rfc3339()),
                    at,
                    trigger,
                ))
                .await;
                if record.priority == Priority::User {
                    self.count_habit(&device, &capability, &state, at, trigger)
                        .await;
                }
            }
            ActionState::Failed | ActionState::TimedOut => {
                let value = json!({
                    "capability": action.capability,
                    "state": action.state,
                    "outcome": record.state.as_str(),
                    "attempts": record.attempt_count(),
                    "reason": record.reason,
                });
                self.write(PortfolioEntry::new(
                    format!("device.{device}.last_failure"),
                    value,
                    at,
                    trigger,
                ))
                .await;
            }
            _ => {}
        }
    }

    /// Count a user action at its local hour; promote to a routine once the
    /// same action has been seen `habit_threshold` times at that hour.
    async fn count_habit(
        &self,
        device: &str,
        capability: &str,
        state: &str,
        at: DateTime<Utc>,
        trigger: EventId,
    ) {
        let hour = at.with_timezone(&Local).hour();
        let key = format!("habit.{device}.{capability}.{state}.h{hour:02}");

        let previous = match self.store.get(&key).await {
            Ok(entry) => entry.and_then(|e| e.value.as_u64()).unwrap_or(0),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read habit counter");
                return;
            }
        };
        let occurrences = previous + 1;
        if !self
            .write(PortfolioEntry::new(key, json!(occurrences), at, trigger))
            .await
        {
            return;
        }

        if occurrences >= u64::from(self.habit_threshold) {
            let routine = format!("routine.{device}.{capability}.{state}");
            let value = json!({
                "device": device,
                "capability": capability,
                "state": state,
                "hour": hour,
                "occurrences": occurrences,
            });
            if occurrences == u64::from(self.habit_threshold) {
                info!(routine = %routine, hour, "Learned a new routine");
            }
            self.write(PortfolioEntry::new(routine, value, at, trigger).with_confidence(0.8))
                .await;
        }
    }

    /// Upsert one entry. Returns whether it was stored.
    async fn write(&self, entry: PortfolioEntry) -> bool {
        let key = entry.key.clone();
        match self.store.upsert(entry, UpsertMode::Normal).await {
            Ok(outcome) => {
                if outcome.stored.needs_confirmation {
                    info!(key = %key, "Portfolio entry needs confirmation");
                }
                debug!(key = %key, "Portfolio updated");
                true
            }
            Err(PortfolioError::StaleWrite { .. }) => {
                debug!(key = %key, "Skipping stale portfolio write");
                false
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Portfolio write failed");
                false
            }
        }
    }
}

//! Action orchestrator: turns device actions into acknowledged state changes.
//!
//! Actions are grouped into lanes, one per `(device, capability)`. A lane
//! holds at most one pending action and dispatches serially, so two
//! conflicting actions never reach the same device at once. Each lane waits a
//! short settle window before dispatching so that actions produced by
//! concurrent pipelines can compete on priority first:
//!
//! - a newcomer with higher or equal priority supersedes the pending action;
//! - a newcomer with lower priority than the pending or in-flight action is
//!   superseded itself.
//!
//! Every attempt is bounded by the acknowledgement timeout and failed
//! attempts are retried with exponential backoff. Terminal outcomes are
//! published on the diagnostic bus, fed back into the ingress log and handed
//! to the portfolio updater.

mod record;

pub use record::{ActionHandle, ActionRecord, AttemptOutcome, AttemptRecord};

use chrono::Utc;
use hearth_config::OrchestratorConfig;
use hearth_core::bus::{Diagnostic, DiagnosticBus};
use hearth_core::device::{DeviceCommand, DeviceController, DeviceState};
use hearth_core::error::DeviceError;
use hearth_core::event::{DeviceReport, NewEvent, PresenceState};
use hearth_core::intent::{ActionState, DeviceAction, Intent, Priority};
use hearth_devices::DeviceRegistry;
use hearth_ingress::EventLog;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::states::KnownStates;
use crate::updater::UpdaterHandle;

/// Terminal records kept for inspection.
const RECORD_HISTORY: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub max_attempts: u32,
    pub ack_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub settle_window: Duration,
    pub presence_guard: bool,
}

impl OrchestratorSettings {
    /// Delay before attempt `attempt + 1`: `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            ack_timeout: Duration::from_millis(config.ack_timeout_ms),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            settle_window: Duration::from_millis(config.settle_window_ms),
            presence_guard: config.presence_guard,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

type LaneKey = (String, String);

struct Pending {
    record: ActionRecord,
    cancel: CancellationToken,
    tx: oneshot::Sender<ActionRecord>,
}

#[derive(Default)]
struct Lane {
    pending: Option<Pending>,
    /// Priority of the action currently being dispatched
    active: Option<Priority>,
    busy: bool,
}

pub struct ActionOrchestrator {
    registry: Arc<DeviceRegistry>,
    controller: Arc<dyn DeviceController>,
    settings: OrchestratorSettings,
    lanes: Mutex<HashMap<LaneKey, Lane>>,
    states: Arc<KnownStates>,
    diagnostics: Arc<DiagnosticBus>,
    ingress: Arc<EventLog>,
    updater: Option<UpdaterHandle>,
    presence: RwLock<Option<PresenceState>>,
    records: Mutex<VecDeque<ActionRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Only unreachable devices are worth another try.
fn is_retryable(error: &DeviceError) -> bool {
    matches!(error, DeviceError::Unreachable(_))
}

impl ActionOrchestrator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        controller: Arc<dyn DeviceController>,
        ingress: Arc<EventLog>,
        diagnostics: Arc<DiagnosticBus>,
    ) -> Self {
        Self {
            registry,
            controller,
            settings: OrchestratorSettings::default(),
            lanes: Mutex::new(HashMap::new()),
            states: Arc::new(KnownStates::new()),
            diagnostics,
            ingress,
            updater: None,
            presence: RwLock::new(None),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share the state cache with context assembly.
    pub fn with_known_states(mut self, states: Arc<KnownStates>) -> Self {
        self.states = states;
        self
    }

    pub fn with_updater(mut self, updater: UpdaterHandle) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn known_states(&self) -> Arc<KnownStates> {
        self.states.clone()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn set_presence(&self, state: PresenceState) {
        let mut presence = self.presence.write().unwrap_or_else(|p| p.into_inner());
        *presence = Some(state);
    }

    pub fn presence(&self) -> Option<PresenceState> {
        *self.presence.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Terminal records, oldest first.
    pub fn records(&self) -> Vec<ActionRecord> {
        lock(&self.records).iter().cloned().collect()
    }

    /// Submit every action of an intent.
    pub fn submit_intent(
        self: &Arc<Self>,
        intent: &Intent,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Vec<ActionHandle> {
        intent
            .actions
            .iter()
            .cloned()
            .map(|action| self.submit(action, priority, cancel))
            .collect()
    }

    /// Queue an action. The handle resolves once it reaches a terminal state.
    pub fn submit(
        self: &Arc<Self>,
        action: DeviceAction,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> ActionHandle {
        let mut record = ActionRecord::new(action, priority);
        let (tx, rx) = oneshot::channel();
        let handle = ActionHandle::new(record.clone(), rx);

        let target = match self.registry.validate(
            &record.action.device,
            &record.action.capability,
            &record.action.state,
        ) {
            Ok(target) => target,
            Err(reason) => {
                self.finish(record, ActionState::Rejected, Some(reason), tx);
                return handle;
            }
        };
        record.action.device = target.device;
        record.action.capability = target.capability;
        record.action.state = target.state;

        if let Some(reason) = self.guard(&record) {
            self.finish(record, ActionState::Rejected, Some(reason), tx);
            return handle;
        }

        debug!(
            action_id = %record.action.id,
            action = %record.action.summary(),
            priority = priority.as_str(),
            "Action submitted"
        );

        let key = (record.action.device.clone(), record.action.capability.clone());
        let incoming = Pending {
            record,
            cancel: cancel.clone(),
            tx,
        };

        let (loser, spawn) = {
            let mut lanes = lock(&self.lanes);
            let lane = lanes.entry(key.clone()).or_default();

            let loser = if lane.active.is_some_and(|active| priority < active) {
                Some((incoming, "a higher-priority action is in progress"))
            } else {
                match lane.pending.take() {
                    Some(pending) if priority < pending.record.priority => {
                        lane.pending = Some(pending);
                        Some((incoming, "a higher-priority action is pending"))
                    }
                    Some(pending) => {
                        lane.pending = Some(incoming);
                        Some((pending, "superseded by a newer action"))
                    }
                    None => {
                        lane.pending = Some(incoming);
                        None
                    }
                }
            };

            let spawn = !lane.busy;
            lane.busy = true;
            (loser, spawn)
        };

        if let Some((loser, reason)) = loser {
            self.finish(
                loser.record,
                ActionState::Superseded,
                Some(reason.to_string()),
                loser.tx,
            );
        }

        if spawn {
            let orchestrator = Arc::clone(self);
            tokio::spawn(async move { orchestrator.run_lane(key).await });
        }

        handle
    }

    /// Why the action must not run in the current household state.
    fn guard(&self, record: &ActionRecord) -> Option<String> {
        let action = &record.action;
        let lights_off = action.capability == "power"
            && action.state == "off"
            && self.registry.is_presence_sensitive(&action.device);

        if self.settings.presence_guard
            && record.priority != Priority::User
            && lights_off
            && self.presence() == Some(PresenceState::Home)
        {
            return Some(format!(
                "not turning off {} while someone is home",
                action.device
            ));
        }
        None
    }

    async fn run_lane(self: Arc<Self>, key: LaneKey) {
        loop {
            if !self.settings.settle_window.is_zero() {
                tokio::time::sleep(self.settings.settle_window).await;
            }

            let next = {
                let mut lanes = lock(&self.lanes);
                let Some(lane) = lanes.get_mut(&key) else {
                    return;
                };
                match lane.pending.take() {
                    Some(pending) => {
                        lane.active = Some(pending.record.priority);
                        pending
                    }
                    None => {
                        lanes.remove(&key);
                        return;
                    }
                }
            };

            self.dispatch(next).await;

            if let Some(lane) = lock(&self.lanes).get_mut(&key) {
                lane.active = None;
            }
        }
    }

    async fn dispatch(&self, pending: Pending) {
        let Pending {
            mut record,
            cancel,
            tx,
        } = pending;

        if cancel.is_cancelled() {
            self.finish(
                record,
                ActionState::Cancelled,
                Some("cancelled before dispatch".into()),
                tx,
            );
            return;
        }

        record.state = ActionState::Dispatched;
        let command = DeviceCommand {
            action_id: record.action.id,
            device: record.action.device.clone(),
            capability: record.action.capability.clone(),
            state: record.action.state.clone(),
        };

        let mut final_state = ActionState::Failed;
        let mut last_error = String::new();

        for attempt in 1..=self.settings.max_attempts {
            let started_at = Utc::now();
            let result =
                tokio::time::timeout(self.settings.ack_timeout, self.controller.apply(command.clone()))
                    .await;

            let (outcome, retry) = match result {
                Ok(Ok(ack)) => {
                    record.attempts.push(AttemptRecord {
                        number: attempt,
                        started_at,
                        finished_at: Utc::now(),
                        outcome: AttemptOutcome::Acknowledged,
                    });
                    self.states.update(DeviceState {
                        device: ack.device,
                        capability: ack.capability,
                        state: ack.state,
                        updated_at: Utc::now(),
                    });
                    self.finish(record, ActionState::Acknowledged, None, tx);
                    return;
                }
                Ok(Err(e)) => (AttemptOutcome::Failed(e.to_string()), is_retryable(&e)),
                Err(_) => (AttemptOutcome::TimedOut, true),
            };

            let timed_out = outcome == AttemptOutcome::TimedOut;
            last_error = match &outcome {
                AttemptOutcome::Failed(e) => e.clone(),
                _ => format!(
                    "no acknowledgement within {}ms",
                    self.settings.ack_timeout.as_millis()
                ),
            };
            final_state = if timed_out {
                ActionState::TimedOut
            } else {
                ActionState::Failed
            };

            warn!(
                action_id = %record.action.id,
                device = %command.device,
                attempt,
                max_attempts = self.settings.max_attempts,
                error = %last_error,
                "Device attempt failed"
            );
            self.diagnostics.publish(Diagnostic::ActionAttemptFailed {
                action_id: record.action.id,
                device: command.device.clone(),
                attempt,
                timed_out,
                error: last_error.clone(),
                timestamp: Utc::now(),
            });
            record.attempts.push(AttemptRecord {
                number: attempt,
                started_at,
                finished_at: Utc::now(),
                outcome,
            });

            if !retry || attempt == self.settings.max_attempts {
                break;
            }

            let delay = self.settings.backoff(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.finish(
                        record,
                        ActionState::Cancelled,
                        Some(format!("cancelled after {attempt} attempt(s)")),
                        tx,
                    );
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.finish(record, final_state, Some(last_error), tx);
    }

    fn finish(
        &self,
        mut record: ActionRecord,
        state: ActionState,
        reason: Option<String>,
        tx: oneshot::Sender<ActionRecord>,
    ) {
        record.state = state;
        record.reason = reason;
        record.finished_at = Some(Utc::now());

        let action = &record.action;
        match state {
            ActionState::Acknowledged => info!(
                action_id = %action.id,
                action = %action.summary(),
                attempts = record.attempt_count(),
                "Action acknowledged"
            ),
            ActionState::Failed | ActionState::TimedOut => warn!(
                action_id = %action.id,
                action = %action.summary(),
                attempts = record.attempt_count(),
                outcome = state.as_str(),
                reason = record.reason.as_deref().unwrap_or(""),
                "Action failed"
            ),
            _ => info!(
                action_id = %action.id,
                action = %action.summary(),
                outcome = state.as_str(),
                reason = record.reason.as_deref().unwrap_or(""),
                "Action not dispatched"
            ),
        }

        self.diagnostics.publish(Diagnostic::ActionFinished {
            action_id: action.id,
            device: action.device.clone(),
            capability: action.capability.clone(),
            state: action.state.clone(),
            outcome: state,
            attempts: record.attempt_count(),
            timestamp: Utc::now(),
        });

        let report = DeviceReport {
            action_id: action.id,
            device: action.device.clone(),
            capability: action.capability.clone(),
            state: action.state.clone(),
            outcome: state,
            attempts: record.attempt_count(),
            reason: record.reason.clone(),
        };
        if let Err(e) = self.ingress.submit(NewEvent::device_ack(report)) {
            debug!(action_id = %action.id, error = %e, "Device report not logged");
        }

        if let Some(updater) = &self.updater {
            updater.record_action(record.clone());
        }

        {
            let mut records = lock(&self.records);
            if records.len() == RECORD_HISTORY {
                records.pop_front();
            }
            records.push_back(record.clone());
        }

        // The submitter may have stopped waiting
        let _ = tx.send(record);
    }
}

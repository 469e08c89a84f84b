//! The runtime: one pipeline per ingress event.
//!
//! ```text
//! EventLog ──► assemble context ──► reason ──► orchestrate actions ──► speak
//!                    ▲                                   │
//!                    └──────── portfolio updater ◄───────┘
//! ```
//!
//! Speech and schedule events each get their own task, so a slow engine
//! call never blocks the next utterance. Presence and device reports are
//! cheap bookkeeping and are handled inline, in log order; when presence
//! also triggers reasoning, that turn is spawned like any other.

use chrono::Utc;
use futures::future::join_all;
use hearth_config::AppConfig;
use hearth_core::bus::{Diagnostic, DiagnosticBus};
use hearth_core::device::DeviceController;
use hearth_core::error::{ActionError, Error, ReasoningError};
use hearth_core::event::{Event, EventPayload, EventSource};
use hearth_core::ids::EventId;
use hearth_core::intent::{Intent, Priority};
use hearth_core::portfolio::PortfolioStore;
use hearth_core::reasoning::ReasoningEngine;
use hearth_core::speech::SpeechSynthesizer;
use hearth_devices::DeviceRegistry;
use hearth_ingress::{EventFeed, EventLog};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{ContextAssembler, ScopeSelector};
use crate::orchestrator::{ActionOrchestrator, ActionRecord};
use crate::reasoning::{ReasoningDispatcher, ReplySink};
use crate::states::KnownStates;
use crate::updater::{PortfolioUpdater, UpdaterHandle};

/// Everything one event led to.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub trigger: EventId,
    pub intent: Option<Intent>,
    /// Terminal records of the intent's actions, in intent order
    pub actions: Vec<ActionRecord>,
    /// Text handed to the synthesizer, in order
    pub spoken: Vec<String>,
}

impl TurnOutcome {
    fn new(trigger: EventId) -> Self {
        Self {
            trigger,
            intent: None,
            actions: Vec::new(),
            spoken: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub react_to_presence: bool,
    pub speak: bool,
    pub stop_phrases: Vec<String>,
}

impl From<&AppConfig> for RuntimeSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            react_to_presence: config.runtime.react_to_presence,
            speak: config.voice.enabled,
            stop_phrases: config
                .voice
                .stop_phrases
                .iter()
                .map(|p| normalize_utterance(p))
                .collect(),
        }
    }
}

/// Priority of actions caused by events from `source`.
pub fn priority_for(source: EventSource) -> Priority {
    match source {
        EventSource::Speech => Priority::User,
        EventSource::Schedule => Priority::Routine,
        EventSource::Presence | EventSource::DeviceAck => Priority::Background,
    }
}

fn normalize_utterance(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn failure_notice(record: &ActionRecord, error: &ActionError) -> Option<String> {
    match error {
        ActionError::ActionFailed { device, .. } => Some(format!(
            "Sorry, I couldn't set the {device} {} to {}.",
            record.action.capability, record.action.state
        )),
        ActionError::Rejected { .. } => None,
    }
}

pub struct Runtime {
    log: Arc<EventLog>,
    assembler: ContextAssembler,
    dispatcher: ReasoningDispatcher,
    orchestrator: Arc<ActionOrchestrator>,
    updater: UpdaterHandle,
    voice: Arc<dyn SpeechSynthesizer>,
    diagnostics: Arc<DiagnosticBus>,
    settings: RuntimeSettings,
    inflight: Mutex<HashMap<EventId, CancellationToken>>,
}

impl Runtime {
    pub fn new(
        log: Arc<EventLog>,
        assembler: ContextAssembler,
        dispatcher: ReasoningDispatcher,
        orchestrator: Arc<ActionOrchestrator>,
        updater: UpdaterHandle,
        voice: Arc<dyn SpeechSynthesizer>,
        diagnostics: Arc<DiagnosticBus>,
    ) -> Self {
        Self {
            log,
            assembler,
            dispatcher,
            orchestrator,
            updater,
            voice,
            diagnostics,
            settings: RuntimeSettings::from(&AppConfig::default()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Show reply text while the engine is still generating it.
    pub fn with_reply_sink(mut self, sink: Arc<dyn ReplySink>) -> Self {
        self.dispatcher = self.dispatcher.with_reply_sink(sink);
        self
    }

    /// Wire every component from configuration. Returns the runtime and
    /// the feed to pass to [`run`](Self::run).
    pub fn from_config(
        config: &AppConfig,
        engine: Arc<dyn ReasoningEngine>,
        store: Arc<dyn PortfolioStore>,
        controller: Arc<dyn DeviceController>,
        voice: Arc<dyn SpeechSynthesizer>,
    ) -> Result<(Self, EventFeed), Error> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        let persona = config.system_prompt().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let diagnostics = Arc::new(DiagnosticBus::new(config.runtime.diagnostics_capacity));
        let (log, feed) = EventLog::new(diagnostics.clone());
        let log = Arc::new(log);
        let registry = Arc::new(DeviceRegistry::from_config(&config.devices));
        let states = Arc::new(KnownStates::new());

        let (updater, _task) = PortfolioUpdater::from_config(store.clone(), &config.portfolio).spawn();

        let orchestrator = Arc::new(
            ActionOrchestrator::new(registry.clone(), controller, log.clone(), diagnostics.clone())
                .with_settings((&config.orchestrator).into())
                .with_known_states(states.clone())
                .with_updater(updater.clone()),
        );

        let assembler = ContextAssembler::new(
            store,
            log.clone(),
            states,
            ScopeSelector::from_config(&config.context),
            (&config.context).into(),
        )
        .with_device_catalog(registry.describe());

        let mut dispatcher =
            ReasoningDispatcher::from_config(engine, &config.reasoning, diagnostics.clone());
        if let Some(persona) = persona {
            dispatcher = dispatcher.with_persona(persona);
        }

        info!(
            devices = registry.len(),
            model = %config.reasoning.model,
            "Runtime ready"
        );

        let runtime = Self::new(
            log,
            assembler,
            dispatcher,
            orchestrator,
            updater,
            voice,
            diagnostics,
        )
        .with_settings(config.into());
        Ok((runtime, feed))
    }

    /// Producers submit here.
    pub fn log(&self) -> Arc<EventLog> {
        self.log.clone()
    }

    pub fn orchestrator(&self) -> Arc<ActionOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticBus> {
        self.diagnostics.clone()
    }

    pub fn updater(&self) -> UpdaterHandle {
        self.updater.clone()
    }

    fn inflight(&self) -> MutexGuard<'_, HashMap<EventId, CancellationToken>> {
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel every turn still being processed. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let inflight = self.inflight();
        for token in inflight.values() {
            token.cancel();
        }
        inflight.len()
    }

    fn is_stop(&self, text: &str) -> bool {
        let said = normalize_utterance(text);
        self.settings.stop_phrases.iter().any(|p| *p == said)
    }

    /// Bookkeeping that has to follow log order. Returns whether the event
    /// also needs a turn.
    fn observe(&self, event: &Event) -> bool {
        match &event.payload {
            EventPayload::DeviceAck(report) => {
                debug!(
                    action_id = %report.action_id,
                    device = %report.device,
                    outcome = report.outcome.as_str(),
                    "Device report logged"
                );
                false
            }
            EventPayload::Presence(signal) => {
                info!(state = signal.state.as_str(), sensor = %signal.sensor, "Presence changed");
                self.orchestrator.set_presence(signal.state);
                self.updater.record_presence(event);
                self.settings.react_to_presence
            }
            EventPayload::Speech(_) | EventPayload::Schedule(_) => true,
        }
    }

    /// Process one event to completion.
    pub async fn handle(&self, event: Arc<Event>) -> TurnOutcome {
        if !self.observe(&event) {
            return TurnOutcome::new(event.id);
        }
        self.respond(event).await
    }

    async fn respond(&self, event: Arc<Event>) -> TurnOutcome {
        let mut outcome = TurnOutcome::new(event.id);

        if let EventPayload::Speech(transcript) = &event.payload
            && self.is_stop(&transcript.text)
        {
            let cancelled = self.cancel_all();
            info!(event_id = %event.id, cancelled, "Stop requested");
            let intent = Intent::stopped(event.id);
            if let Some(reply) = &intent.reply {
                self.speak(reply, &mut outcome).await;
            }
            self.updater.record_interaction(&event, &intent);
            outcome.intent = Some(intent);
            return outcome;
        }

        let cancel = CancellationToken::new();
        self.inflight().insert(event.id, cancel.clone());
        self.process(&event, &cancel, &mut outcome).await;
        self.inflight().remove(&event.id);
        outcome
    }

    async fn process(&self, event: &Arc<Event>, cancel: &CancellationToken, outcome: &mut TurnOutcome) {
        let source = event.source();

        let snapshot = match self.assembler.assemble(event).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(event_id = %event.id, reason = %e, "Using minimal context");
                self.assembler.minimal(event.clone())
            }
        };

        let intent = match self.dispatcher.invoke(Arc::new(snapshot), cancel).await {
            Ok(intent) => intent,
            Err(ReasoningError::Cancelled) => {
                outcome.intent = Some(Intent::stopped(event.id));
                return;
            }
            Err(e) => {
                self.report_failure(event.id, "reasoning", &e.to_string());
                let intent = match e {
                    ReasoningError::IntentParse(_) => Intent::clarification(event.id),
                    _ => Intent::apology(event.id),
                };
                self.diagnostics.publish(Diagnostic::IntentProduced {
                    trigger: event.id,
                    intent: intent.id,
                    actions: 0,
                    fallback: true,
                    timestamp: Utc::now(),
                });
                intent
            }
        };

        let priority = priority_for(source);
        let handles = self.orchestrator.submit_intent(&intent, priority, cancel);

        // Routines only speak when they have something real to say
        let announce = match source {
            EventSource::Speech => true,
            EventSource::Schedule => !intent.is_fallback(),
            EventSource::Presence | EventSource::DeviceAck => false,
        };
        if announce && let Some(reply) = &intent.reply {
            self.speak(reply, outcome).await;
        }

        let records = join_all(handles.into_iter().map(|h| h.outcome())).await;
        for record in &records {
            let Err(error) = record.as_result() else { continue };
            debug!(event_id = %event.id, error = %error, "Action did not take effect");
            if source == EventSource::Speech
                && let Some(notice) = failure_notice(record, &error)
            {
                self.speak(&notice, outcome).await;
            }
        }

        if source == EventSource::Speech {
            self.updater.record_interaction(event, &intent);
        }

        info!(
            event_id = %event.id,
            intent_id = %intent.id,
            actions = records.len(),
            acknowledged = records.iter().filter(|r| r.is_acknowledged()).count(),
            "Turn complete"
        );
        outcome.actions = records;
        outcome.intent = Some(intent);
    }

    fn report_failure(&self, trigger: EventId, context: &str, error: &str) {
        warn!(event_id = %trigger, context, error, "Pipeline failed");
        self.diagnostics.publish(Diagnostic::PipelineFailed {
            trigger,
            context: context.to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
        self.updater.record_failure(trigger, context, error);
    }

    async fn speak(&self, text: &str, outcome: &mut TurnOutcome) {
        if !self.settings.speak {
            return;
        }
        match self.voice.speak(text).await {
            Ok(()) => outcome.spoken.push(text.to_string()),
            Err(e) => warn!(voice = %self.voice.name(), error = %e, "Speech synthesis failed"),
        }
    }

    /// Consume the feed until it closes or `shutdown` fires. Outcomes of
    /// every turn are sent to `outcomes` when given.
    pub async fn run(
        self: Arc<Self>,
        mut feed: EventFeed,
        shutdown: CancellationToken,
        outcomes: Option<mpsc::UnboundedSender<TurnOutcome>>,
    ) {
        let mut turns = JoinSet::new();
        info!("Runtime started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = feed.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            if self.observe(&event) {
                let runtime = self.clone();
                let tx = outcomes.clone();
                turns.spawn(async move {
                    let outcome = runtime.respond(event).await;
                    if let Some(tx) = tx {
                        let _ = tx.send(outcome);
                    }
                });
            } else if event.source() == EventSource::Presence
                && let Some(tx) = &outcomes
            {
                let _ = tx.send(TurnOutcome::new(event.id));
            }

            while let Some(done) = turns.try_join_next() {
                if let Err(e) = done {
                    warn!(error = %e, "Turn task failed");
                }
            }
        }

        let cancelled = self.cancel_all();
        self.log.close();
        while let Some(done) = turns.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "Turn task failed");
            }
        }
        self.updater.flush().await;
        info!(cancelled, "Runtime stopped");
    }
}

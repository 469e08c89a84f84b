//! End-to-end integration tests for the Hearth runtime.
//!
//! These tests drive events through the full pipeline: ingress log, context
//! assembly, reasoning with a scripted engine, action orchestration against
//! the simulated home and portfolio updates.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use hearth_agent::{ContextAssembler, KnownStates, Runtime, ScopeSelector, TurnOutcome};
use hearth_config::{AppConfig, RoutineConfig};
use hearth_core::bus::{Diagnostic, DiagnosticBus};
use hearth_core::error::EngineError;
use hearth_core::event::{NewEvent, PresenceSignal, PresenceState, Transcript};
use hearth_core::ids::EventId;
use hearth_core::intent::{ActionState, FallbackReason, IntentOrigin, Priority};
use hearth_core::portfolio::{PortfolioEntry, PortfolioStore, UpsertMode};
use hearth_core::reasoning::{ReasoningEngine, ReasoningRequest};
use hearth_core::speech::SilentVoice;
use hearth_devices::{DeviceRegistry, Fault, SimulatedHome};
use hearth_ingress::{EventFeed, EventLog, RoutineScheduler};
use hearth_portfolio::{FilePortfolio, InMemoryPortfolio};
use serde_json::json;
use tokio::sync::broadcast;

// ── Scripted engines ─────────────────────────────────────────────────────

enum Step {
    Reply(String),
    Hang,
}

/// Plays back replies in order and counts calls.
struct ScriptedEngine {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<usize>,
}

impl ScriptedEngine {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(0),
        }
    }

    fn replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Step::Reply(r.to_string())).collect())
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn complete(&self, _request: ReasoningRequest) -> Result<String, EngineError> {
        *self.calls.lock().unwrap() += 1;
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Hang) => std::future::pending().await,
            None => panic!("ScriptedEngine exhausted"),
        }
    }
}

/// Answers by inspecting the prompt, for turns that run concurrently.
struct RuleEngine<F>(F);

#[async_trait::async_trait]
impl<F> ReasoningEngine for RuleEngine<F>
where
    F: Fn(&ReasoningRequest) -> String + Send + Sync,
{
    fn name(&self) -> &str {
        "e2e_rules"
    }

    async fn complete(&self, request: ReasoningRequest) -> Result<String, EngineError> {
        Ok((self.0)(&request))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct House {
    runtime: Arc<Runtime>,
    feed: EventFeed,
    home: Arc<SimulatedHome>,
    store: Arc<dyn PortfolioStore>,
}

fn house_with(
    engine: Arc<dyn ReasoningEngine>,
    store: Arc<dyn PortfolioStore>,
    tweak: impl FnOnce(&mut AppConfig),
) -> House {
    let mut config = AppConfig::default();
    config.reasoning.timeout_ms = 500;
    tweak(&mut config);

    let home = Arc::new(SimulatedHome::new(DeviceRegistry::from_config(&config.devices)));
    let (runtime, feed) = Runtime::from_config(
        &config,
        engine,
        store.clone(),
        home.clone(),
        Arc::new(SilentVoice),
    )
    .unwrap();
    House {
        runtime: Arc::new(runtime),
        feed,
        home,
        store,
    }
}

fn house(engine: Arc<dyn ReasoningEngine>) -> House {
    house_with(engine, Arc::new(InMemoryPortfolio::new()), |_| {})
}

impl House {
    /// Pull events until `id` arrives; device reports in between are skipped.
    async fn next_event(&mut self, id: EventId) -> Arc<hearth_core::event::Event> {
        loop {
            let event = self.feed.recv().await.unwrap();
            if event.id == id {
                return event;
            }
        }
    }

    /// Report someone at home and fold it in before the next turn.
    async fn arrive_home(&mut self, zone: Option<&str>) {
        let id = self
            .runtime
            .log()
            .submit(NewEvent::presence(PresenceSignal {
                state: PresenceState::Home,
                zone: zone.map(str::to_string),
                sensor: "motion".into(),
            }))
            .unwrap();
        let event = self.next_event(id).await;
        self.runtime.handle(event).await;
    }

    async fn say(&mut self, text: &str) -> TurnOutcome {
        let id = self
            .runtime
            .log()
            .submit(NewEvent::speech(Transcript::immediate(text, Utc::now())))
            .unwrap();
        let event = self.next_event(id).await;
        self.runtime.handle(event).await
    }
}

fn count<F>(rx: &mut broadcast::Receiver<Arc<Diagnostic>>, pred: F) -> usize
where
    F: Fn(&Diagnostic) -> bool,
{
    let mut n = 0;
    while let Ok(d) = rx.try_recv() {
        if pred(d.as_ref()) {
            n += 1;
        }
    }
    n
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_turn_on_the_lights() {
    let engine = Arc::new(ScriptedEngine::replies(&[
        r#"Sure, lights on. <action device="living-room-light" capability="power" state="on"/>"#,
    ]));
    let mut h = house(engine.clone());
    h.arrive_home(None).await;

    let outcome = h.say("turn on the lights").await;

    let intent = outcome.intent.clone().unwrap();
    assert_eq!(intent.origin, IntentOrigin::Reasoned);
    assert_eq!(outcome.spoken, vec!["Sure, lights on.".to_string()]);
    assert_eq!(outcome.actions.len(), 1);
    let record = &outcome.actions[0];
    assert_eq!(record.state, ActionState::Acknowledged);
    assert_eq!(record.priority, Priority::User);
    assert_eq!(record.action.intent, intent.id);
    assert_eq!(record.action.trigger, outcome.trigger);
    assert_eq!(h.home.state_of("living-room-light", "power").as_deref(), Some("on"));
    assert_eq!(engine.calls(), 1);

    h.runtime.updater().flush().await;
    let stored = h.store.get("device.living-room-light.power").await.unwrap().unwrap();
    assert_eq!(stored.value, json!("on"));
    assert_eq!(stored.source_event, outcome.trigger);

    let last_on = h
        .store
        .get("device.living-room-light.power.on.last_at")
        .await
        .unwrap()
        .unwrap();
    let at = chrono::DateTime::parse_from_rfc3339(last_on.value.as_str().unwrap()).unwrap();
    assert!(at.with_timezone(&Utc) >= record.submitted_at);
    assert_eq!(last_on.source_event, outcome.trigger);

    let presence = h.store.get("presence.state").await.unwrap().unwrap();
    assert_eq!(presence.value, json!("home"));
}

#[tokio::test(start_paused = true)]
async fn e2e_engine_timeouts_end_in_apology() {
    let engine = Arc::new(ScriptedEngine::new(vec![Step::Hang, Step::Hang, Step::Hang]));
    let mut h = house(engine.clone());
    let mut diags = h.runtime.diagnostics().subscribe();

    let outcome = h.say("what's the weather like?").await;

    let intent = outcome.intent.unwrap();
    assert_eq!(intent.origin, IntentOrigin::Fallback(FallbackReason::Unavailable));
    assert!(intent.actions.is_empty());
    assert!(outcome.actions.is_empty());
    assert_eq!(outcome.spoken.len(), 1);
    assert!(h.home.received().is_empty());
    assert_eq!(engine.calls(), 3);
    assert_eq!(
        count(&mut diags, |d| matches!(d, Diagnostic::ReasoningAttemptFailed { .. })),
        3
    );

    h.runtime.updater().flush().await;
    assert!(h.store.get("system.last_failure").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn e2e_user_command_beats_concurrent_routine() {
    let engine = Arc::new(RuleEngine(|request: &ReasoningRequest| {
        if request.prompt.contains("Scheduled routine") {
            r#"<action device="living-room-light" capability="power" state="off"/>"#.to_string()
        } else {
            r#"Keeping the lights on. <action device="lights" capability="power" state="on"/>"#
                .to_string()
        }
    }));
    let mut h = house(engine);

    let log = h.runtime.log();
    let mut scheduler = RoutineScheduler::from_config(
        log.clone(),
        &[RoutineConfig {
            name: "lights-out".into(),
            schedule: "* * * * *".into(),
            prompt: "Turn the living room light off".into(),
            enabled: true,
        }],
    )
    .unwrap();
    let routine_id = scheduler.check(Utc::now())[0];
    let user_id = log
        .submit(NewEvent::speech(Transcript::immediate("keep the lights on", Utc::now())))
        .unwrap();

    let routine_event = h.next_event(routine_id).await;
    let user_event = h.next_event(user_id).await;
    let (routine, user) = tokio::join!(
        h.runtime.handle(routine_event),
        h.runtime.handle(user_event)
    );

    assert_eq!(routine.actions[0].state, ActionState::Superseded);
    assert_eq!(routine.actions[0].priority, Priority::Routine);
    assert_eq!(user.actions[0].state, ActionState::Acknowledged);

    let sent: Vec<String> = h.home.received().into_iter().map(|c| c.state).collect();
    assert_eq!(sent, vec!["on".to_string()]);
    assert_eq!(h.home.state_of("living-room-light", "power").as_deref(), Some("on"));
}

#[tokio::test(start_paused = true)]
async fn e2e_unreachable_device_recovers() {
    let engine = Arc::new(ScriptedEngine::replies(&[
        r#"Fan on. <action device="fan" capability="power" state="on"/>"#,
    ]));
    let mut h = house(engine);
    let mut diags = h.runtime.diagnostics().subscribe();
    h.home.fail_next("ceiling-fan", 2, Fault::Unreachable);

    let outcome = h.say("it's hot, turn on the fan").await;

    let record = &outcome.actions[0];
    assert_eq!(record.state, ActionState::Acknowledged);
    assert_eq!(record.attempt_count(), 3);
    assert_eq!(
        count(&mut diags, |d| matches!(d, Diagnostic::ActionAttemptFailed { .. })),
        2
    );
    // No failure notice for an action that got through
    assert_eq!(outcome.spoken, vec!["Fan on.".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn e2e_failed_action_is_announced() {
    let engine = Arc::new(ScriptedEngine::replies(&[
        r#"Fan on. <action device="fan" capability="power" state="on"/>"#,
    ]));
    let mut h = house(engine);
    h.home.fail_next("ceiling-fan", 3, Fault::Unreachable);

    let outcome = h.say("turn on the fan").await;

    assert_eq!(outcome.actions[0].state, ActionState::Failed);
    assert_eq!(outcome.spoken.len(), 2);
    assert!(outcome.spoken[1].contains("ceiling-fan"));

    h.runtime.updater().flush().await;
    let failure = h.store.get("device.ceiling-fan.last_failure").await.unwrap().unwrap();
    assert_eq!(failure.value["attempts"], json!(3));
}

#[tokio::test(start_paused = true)]
async fn e2e_every_action_reaches_a_terminal_state() {
    let engine = Arc::new(ScriptedEngine::replies(&[concat!(
        "Good night. ",
        r#"<action device="lights" capability="power" state="off"/>"#,
        r#"<action device="curtains" capability="position" state="closed"/>"#,
        r#"<action device="fan" capability="speed" state="low"/>"#,
        r#"<action device="toaster" capability="power" state="on"/>"#,
        "<confidence>0.8</confidence>",
    )]));
    let mut h = house(engine);
    let mut diags = h.runtime.diagnostics().subscribe();

    let outcome = h.say("good night").await;

    let intent = outcome.intent.unwrap();
    assert_eq!(intent.actions.len(), 4);
    assert_eq!(outcome.actions.len(), 4);
    assert!(outcome.actions.iter().all(|r| r.state.is_terminal()));
    let states: Vec<ActionState> = outcome.actions.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![
            ActionState::Acknowledged,
            ActionState::Acknowledged,
            ActionState::Acknowledged,
            ActionState::Rejected,
        ]
    );
    assert_eq!(
        count(&mut diags, |d| matches!(d, Diagnostic::ActionFinished { .. })),
        4
    );
}

#[tokio::test(start_paused = true)]
async fn e2e_repeated_commands_are_idempotent() {
    let reply = r#"On it. <action device="bedroom-light" capability="power" state="on"/>"#;
    let engine = Arc::new(ScriptedEngine::replies(&[reply, reply]));
    let mut h = house(engine);

    let first = h.say("bedroom lights on").await;
    let second = h.say("bedroom lights on").await;

    assert_eq!(first.actions[0].state, ActionState::Acknowledged);
    assert_eq!(second.actions[0].state, ActionState::Acknowledged);
    assert_eq!(h.home.received().len(), 2);
    assert_eq!(h.home.state_of("bedroom-light", "power").as_deref(), Some("on"));
    let known = h.runtime.orchestrator().known_states().get("bedroom-light", "power");
    assert_eq!(known.unwrap().state, "on");
}

#[tokio::test(start_paused = true)]
async fn e2e_presence_guard_protects_occupied_rooms() {
    let engine = Arc::new(ScriptedEngine::replies(&[
        r#"<action device="living-room-light" capability="power" state="off"/>"#,
    ]));
    let mut h = house(engine);
    let log = h.runtime.log();
    h.arrive_home(Some("living room")).await;

    let mut scheduler = RoutineScheduler::from_config(
        log.clone(),
        &[RoutineConfig {
            name: "lights-out".into(),
            schedule: "* * * * *".into(),
            prompt: "Lights off".into(),
            enabled: true,
        }],
    )
    .unwrap();
    let routine = scheduler.check(Utc::now())[0];
    let event = h.next_event(routine).await;
    let outcome = h.runtime.handle(event).await;

    assert_eq!(outcome.actions[0].state, ActionState::Rejected);
    assert!(outcome.spoken.is_empty());
    assert!(h.home.received().is_empty());
}

#[tokio::test]
async fn e2e_context_assembly_is_deterministic() {
    let bus = Arc::new(DiagnosticBus::default());
    let (log, _feed) = EventLog::new(bus);
    let log = Arc::new(log);
    let store = Arc::new(InMemoryPortfolio::new());
    let now = Utc::now();

    for (key, value) in [
        ("routine.bedtime", json!("22:30")),
        ("preference.lighting", json!("warm")),
        ("schedule.dentist", json!("tomorrow 9am")),
    ] {
        store
            .upsert(
                PortfolioEntry::new(key, value, now - Duration::hours(1), EventId::new()),
                UpsertMode::Normal,
            )
            .await
            .unwrap();
    }

    log.submit(NewEvent::speech(Transcript::immediate(
        "it's getting dark",
        now - Duration::minutes(5),
    )))
    .unwrap();
    log.submit(NewEvent::speech(Transcript::immediate(
        "hello from long ago",
        now - Duration::hours(3),
    )))
    .unwrap();
    let trigger_id = log
        .submit(NewEvent::speech(Transcript::immediate("going to bed, lights off", now)))
        .unwrap();
    let trigger = log.get(trigger_id).unwrap();

    let config = AppConfig::default();
    let assembler = ContextAssembler::new(
        store.clone(),
        log.clone(),
        Arc::new(KnownStates::new()),
        ScopeSelector::from_config(&config.context),
        (&config.context).into(),
    );

    let first = assembler.assemble(&trigger).await.unwrap();
    let second = assembler.assemble(&trigger).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.render_context(), second.render_context());

    // Events logged after the trigger never leak into its snapshot
    log.submit(NewEvent::speech(Transcript::immediate(
        "one more thing",
        now + Duration::seconds(1),
    )))
    .unwrap();
    let third = assembler.assemble(&trigger).await.unwrap();
    assert_eq!(first, third);

    let keys: Vec<&str> = first.portfolio().iter().map(|e| e.key.as_str()).collect();
    assert!(keys.contains(&"routine.bedtime"));
    assert!(keys.contains(&"preference.lighting"));
    assert!(!keys.contains(&"schedule.dentist"));
    assert_eq!(first.recent_events().len(), 1);
    assert!(first.metadata().total_tokens <= config.context.token_budget);
}

#[tokio::test(start_paused = true)]
async fn e2e_portfolio_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portfolio.jsonl");

    {
        let engine = Arc::new(ScriptedEngine::replies(&[
            r#"Opening. <action device="curtains" capability="position" state="open"/>"#,
        ]));
        let store: Arc<dyn PortfolioStore> = Arc::new(FilePortfolio::open(&path).unwrap());
        let mut h = house_with(engine, store, |_| {});
        let outcome = h.say("open the curtains").await;
        assert_eq!(outcome.actions[0].state, ActionState::Acknowledged);
        h.runtime.updater().flush().await;
    }

    let reopened = FilePortfolio::open(&path).unwrap();
    let entry = reopened
        .get("device.living-room-curtains.position")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.value, json!("open"));
    assert_eq!(
        reopened.get("interaction.last_utterance").await.unwrap().unwrap().value,
        json!("open the curtains")
    );
}

//! Reasoning dispatcher: snapshot in, intent out.
//!
//! Each attempt is bounded by a hard timeout. Timeouts and transient engine
//! errors are retried with identical input. Output that cannot be parsed is
//! returned as `IntentParse` without retrying.
//!
//! With a [`ReplySink`] attached, the engine is asked to stream and the
//! visible reply text is handed to the sink while it is generated.

use chrono::Utc;
use hearth_config::ReasoningConfig;
use hearth_core::bus::{Diagnostic, DiagnosticBus};
use hearth_core::error::{EngineError, ReasoningError};
use hearth_core::ids::{EventId, IntentId};
use hearth_core::intent::{DeviceAction, Intent, IntentOrigin};
use hearth_core::reasoning::{ReasoningEngine, ReasoningRequest};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::ContextSnapshot;
use crate::reasoning::parser::{self, ACTION_SCHEMA, ReplyFilter};

pub const DEFAULT_PERSONA: &str = "You are Hearth, a warm and concise voice assistant living in \
this home. You know the household's habits and can control the devices listed below. Never \
invent devices or states.";

/// Receives reply text while the engine is still generating it.
pub trait ReplySink: Send + Sync {
    /// Visible text of `trigger`'s reply, directive tags removed.
    fn chunk(&self, trigger: EventId, text: &str);

    /// Reasoning for `trigger` is over; `reply` is the parsed reply, if any.
    fn finish(&self, trigger: EventId, reply: Option<&str>);
}

pub struct ReasoningDispatcher {
    engine: Arc<dyn ReasoningEngine>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
    max_attempts: u32,
    persona: String,
    diagnostics: Arc<DiagnosticBus>,
    sink: Option<Arc<dyn ReplySink>>,
}

fn is_transient(error: &EngineError) -> bool {
    match error {
        EngineError::Timeout(_) | EngineError::Network(_) => true,
        EngineError::Api { status_code, .. } => *status_code == 429 || *status_code >= 500,
        EngineError::NotConfigured(_) => false,
    }
}

impl ReasoningDispatcher {
    pub fn new(engine: Arc<dyn ReasoningEngine>, diagnostics: Arc<DiagnosticBus>) -> Self {
        Self::from_config(engine, &ReasoningConfig::default(), diagnostics)
    }

    pub fn from_config(
        engine: Arc<dyn ReasoningEngine>,
        config: &ReasoningConfig,
        diagnostics: Arc<DiagnosticBus>,
    ) -> Self {
        Self {
            engine,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            timeout: config.timeout(),
            max_attempts: config.max_attempts.max(1),
            persona: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            diagnostics,
            sink: None,
        }
    }

    pub fn with_reply_sink(mut self, sink: Arc<dyn ReplySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// The exact request sent for `snapshot`. Identical on every attempt.
    pub fn request_for(&self, snapshot: &ContextSnapshot) -> ReasoningRequest {
        let context = snapshot.render_context();
        let system = if context.is_empty() {
            format!("{}\n\n{}", self.persona, ACTION_SCHEMA)
        } else {
            format!("{}\n\n{}\n\n{}", self.persona, ACTION_SCHEMA, context)
        };
        ReasoningRequest {
            model: self.model.clone(),
            system,
            prompt: snapshot.render_prompt(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub async fn invoke(
        &self,
        snapshot: Arc<ContextSnapshot>,
        cancel: &CancellationToken,
    ) -> Result<Intent, ReasoningError> {
        let result = self.attempts(&snapshot, cancel).await;
        if let Some(sink) = &self.sink {
            let reply = result.as_ref().ok().and_then(|intent| intent.reply.as_deref());
            sink.finish(snapshot.trigger().id, reply);
        }
        result
    }

    async fn call_engine(&self, trigger: EventId, request: ReasoningRequest) -> Result<String, EngineError> {
        let Some(sink) = &self.sink else {
            return self.engine.complete(request).await;
        };

        let filter = Mutex::new(ReplyFilter::new());
        let on_chunk = |chunk: &str| {
            let visible = filter
                .lock()
                .map(|mut f| f.push(chunk))
                .unwrap_or_default();
            if !visible.is_empty() {
                sink.chunk(trigger, &visible);
            }
        };
        let text = self.engine.complete_streaming(request, &on_chunk).await?;

        let rest = filter.lock().map(|mut f| f.flush()).unwrap_or_default();
        if !rest.is_empty() {
            sink.chunk(trigger, &rest);
        }
        Ok(text)
    }

    async fn attempts(
        &self,
        snapshot: &Arc<ContextSnapshot>,
        cancel: &CancellationToken,
    ) -> Result<Intent, ReasoningError> {
        let trigger = snapshot.trigger().id;
        let request = self.request_for(&snapshot);
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=self.max_attempts {
            debug!(event_id = %trigger, attempt, engine = %self.engine.name(), "Invoking reasoning engine");

            let call = tokio::time::timeout(self.timeout, self.call_engine(trigger, request.clone()));
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(event_id = %trigger, "Reasoning cancelled");
                    return Err(ReasoningError::Cancelled);
                }
                result = call => result,
            };

            let error = match result {
                Ok(Ok(text)) => return self.to_intent(snapshot, &text),
                Ok(Err(e)) => e,
                Err(_) => EngineError::Timeout(format!(
                    "no response within {}ms",
                    self.timeout.as_millis()
                )),
            };

            warn!(
                event_id = %trigger,
                attempt,
                max_attempts = self.max_attempts,
                error = %error,
                "Reasoning attempt failed"
            );
            self.diagnostics.publish(Diagnostic::ReasoningAttemptFailed {
                trigger,
                attempt,
                error: error.to_string(),
                timestamp: Utc::now(),
            });
            last_error = error.to_string();

            if !is_transient(&error) {
                return Err(ReasoningError::Unavailable {
                    attempts: attempt,
                    last_error,
                });
            }
        }

        Err(ReasoningError::Unavailable {
            attempts: self.max_attempts,
            last_error,
        })
    }

    fn to_intent(&self, snapshot: &ContextSnapshot, text: &str) -> Result<Intent, ReasoningError> {
        let trigger = snapshot.trigger().id;
        let directives = parser::parse(text).map_err(|e| {
            warn!(event_id = %trigger, error = %e, "Unparseable engine output");
            ReasoningError::IntentParse(e.to_string())
        })?;

        let id = IntentId::new();
        let actions: Vec<DeviceAction> = directives
            .actions
            .into_iter()
            .map(|a| DeviceAction::new(a.device, a.capability, a.state, id, trigger))
            .collect();

        self.diagnostics.publish(Diagnostic::IntentProduced {
            trigger,
            intent: id,
            actions: actions.len(),
            fallback: false,
            timestamp: Utc::now(),
        });
        info!(event_id = %trigger, intent_id = %id, actions = actions.len(), confidence = directives.confidence, "Intent produced");

        Ok(Intent {
            id,
            trigger,
            snapshot: snapshot.id(),
            reply: directives.reply,
            actions,
            confidence: directives.confidence,
            origin: IntentOrigin::Reasoned,
        })
    }
}

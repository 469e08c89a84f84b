//! Shared test helpers: a scripted reasoning engine and event builders.

use async_trait::async_trait;
use chrono::Utc;
use hearth_core::error::EngineError;
use hearth_core::event::{Event, EventPayload, Provenance, Transcript};
use hearth_core::ids::EventId;
use hearth_core::reasoning::{ReasoningEngine, ReasoningRequest};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// What the scripted engine does on one call.
pub enum Step {
    Reply(String),
    Fail(EngineError),
    /// Never answer
    Hang,
}

impl Step {
    pub fn reply(text: &str) -> Self {
        Self::Reply(text.to_string())
    }
}

/// An engine that plays back scripted steps and records every request.
pub struct ScriptedEngine {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ReasoningRequest) -> Result<String, EngineError> {
        self.requests.lock().unwrap().push(request);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(EngineError::NotConfigured("script exhausted".into())),
        }
    }
}

pub fn speech_event(text: &str) -> Arc<Event> {
    Arc::new(Event {
        id: EventId::new(),
        sequence: 0,
        timestamp: Utc::now(),
        provenance: Provenance {
            producer: "speech".into(),
            confidence: 1.0,
        },
        payload: EventPayload::Speech(Transcript::immediate(text, Utc::now())),
    })
}

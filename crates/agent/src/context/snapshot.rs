//! The immutable, per-invocation view handed to reasoning.

use hearth_core::device::DeviceState;
use hearth_core::event::{Event, EventPayload};
use hearth_core::ids::EventId;
use hearth_core::portfolio::PortfolioEntry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::token;

/// Statistics for a single context section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionStats {
    pub name: String,
    pub tokens: usize,
    pub items_included: usize,
    pub items_total: usize,
}

/// Items dropped from a section while enforcing bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropInfo {
    pub section: String,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    /// Portfolio scopes selected for the trigger
    pub scopes: Vec<String>,
    pub total_tokens: usize,
    pub budget: usize,
    pub sections: Vec<SectionStats>,
    pub drops: Vec<DropInfo>,
    /// Built by [`ContextSnapshot::minimal`]
    pub minimal: bool,
}

/// A bounded point-in-time view of the home for one reasoning call.
///
/// Fields are private and there are no setters; share it through `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSnapshot {
    id: EventId,
    trigger: Arc<Event>,
    portfolio: Vec<PortfolioEntry>,
    recent_events: Vec<Arc<Event>>,
    device_states: Vec<DeviceState>,
    devices: String,
    metadata: AssemblyMetadata,
}

impl ContextSnapshot {
    pub(crate) fn new(
        trigger: Arc<Event>,
        portfolio: Vec<PortfolioEntry>,
        recent_events: Vec<Arc<Event>>,
        device_states: Vec<DeviceState>,
        devices: String,
        metadata: AssemblyMetadata,
    ) -> Self {
        Self {
            id: trigger.id,
            trigger,
            portfolio,
            recent_events,
            device_states,
            devices,
            metadata,
        }
    }

    /// A snapshot carrying only the trigger and the device catalog. Used when
    /// assembly finds nothing relevant.
    pub fn minimal(trigger: Arc<Event>, devices: impl Into<String>) -> Self {
        let metadata = AssemblyMetadata {
            minimal: true,
            ..Default::default()
        };
        Self::new(trigger, Vec::new(), Vec::new(), Vec::new(), devices.into(), metadata)
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn trigger(&self) -> &Arc<Event> {
        &self.trigger
    }

    pub fn portfolio(&self) -> &[PortfolioEntry] {
        &self.portfolio
    }

    pub fn recent_events(&self) -> &[Arc<Event>] {
        &self.recent_events
    }

    pub fn device_states(&self) -> &[DeviceState] {
        &self.device_states
    }

    pub fn metadata(&self) -> &AssemblyMetadata {
        &self.metadata
    }

    /// Context sections for the system prompt.
    pub fn render_context(&self) -> String {
        let mut sections = Vec::new();

        if !self.devices.is_empty() {
            sections.push(format!("[Devices]\n{}\n", self.devices));
        }
        if !self.portfolio.is_empty() {
            let lines: String = self.portfolio.iter().map(token::render_entry).collect();
            sections.push(format!("[What you know about the household]\n{lines}"));
        }
        if !self.device_states.is_empty() {
            let lines: String = self
                .device_states
                .iter()
                .map(token::render_device_state)
                .collect();
            sections.push(format!("[Current device states]\n{lines}"));
        }
        if !self.recent_events.is_empty() {
            let lines: String = self.recent_events.iter().map(|e| token::render_event(e)).collect();
            sections.push(format!("[Recent events]\n{lines}"));
        }

        sections.join("\n")
    }

    /// The trigger rendered as the user turn.
    pub fn render_prompt(&self) -> String {
        let at = self.trigger.timestamp.format("%Y-%m-%d %H:%M");
        match &self.trigger.payload {
            EventPayload::Speech(t) => t.text.trim().to_string(),
            EventPayload::Schedule(s) => match &s.prompt {
                Some(prompt) => format!(
                    "[{at}] Scheduled routine '{}' is due. {}",
                    s.title,
                    prompt.trim()
                ),
                None => format!("[{at}] Schedule update: {}", self.trigger.describe()),
            },
            EventPayload::Presence(p) => format!(
                "[{at}] Presence changed to {}{}. Decide whether anything should change.",
                p.state.as_str(),
                p.zone
                    .as_ref()
                    .map(|z| format!(" in {z}"))
                    .unwrap_or_default()
            ),
            EventPayload::DeviceAck(_) => self.trigger.describe(),
        }
    }
}

//! Intents and device actions: the structured output of reasoning.

use serde::{Deserialize, Serialize};

use crate::ids::{ActionId, EventId, IntentId};

/// Reply used when the engine output could not be understood.
pub const CLARIFICATION_REPLY: &str = "Sorry, I didn't quite catch that. Could you say it again?";

/// Reply used when the reasoning engine could not be reached.
pub const APOLOGY_REPLY: &str =
    "I'm sorry, I can't think right now. Please try again in a moment.";

/// How urgently an action should win over competing ones.
///
/// Ordered: `Background < Routine < User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Sensor-driven reactions.
    Background,
    /// Scheduled routines.
    Routine,
    /// Explicit user commands.
    User,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Routine => "routine",
            Self::User => "user",
        }
    }
}

/// Lifecycle of a device action.
///
/// `Pending → Dispatched → Acknowledged | Failed | TimedOut`. Actions that
/// never reach the device end as `Rejected`, `Superseded` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Dispatched,
    Acknowledged,
    Failed,
    TimedOut,
    Rejected,
    Superseded,
    Cancelled,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Dispatched)
    }

    /// Terminal states that mean the device did not end up in the desired state
    /// because delivery failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Acknowledged => "acknowledged",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
            Self::Superseded => "superseded",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One requested state change on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAction {
    pub id: ActionId,
    /// Device id or alias as produced by reasoning; resolved by the orchestrator.
    pub device: String,
    pub capability: String,
    pub state: String,
    /// The intent this action belongs to.
    pub intent: IntentId,
    /// The event that ultimately caused it.
    pub trigger: EventId,
}

impl DeviceAction {
    pub fn new(
        device: impl Into<String>,
        capability: impl Into<String>,
        state: impl Into<String>,
        intent: IntentId,
        trigger: EventId,
    ) -> Self {
        Self {
            id: ActionId::new(),
            device: device.into(),
            capability: capability.into(),
            state: state.into(),
            intent,
            trigger,
        }
    }

    /// `device capability=state`, for logs and prompts.
    pub fn summary(&self) -> String {
        format!("{} {}={}", self.device, self.capability, self.state)
    }
}

/// Why a fallback intent was produced instead of a reasoned one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Unparseable,
    Unavailable,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum IntentOrigin {
    Reasoned,
    Fallback(FallbackReason),
}

/// The structured result of one reasoning call. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    pub trigger: EventId,
    /// The context snapshot reasoning saw (snapshot ids equal trigger ids)
    pub snapshot: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default)]
    pub actions: Vec<DeviceAction>,
    pub confidence: f32,
    pub origin: IntentOrigin,
}

impl Intent {
    /// Fallback when the engine output could not be parsed.
    pub fn clarification(trigger: EventId) -> Self {
        Self::fallback(trigger, CLARIFICATION_REPLY, FallbackReason::Unparseable)
    }

    /// Fallback when the engine exhausted its retries.
    pub fn apology(trigger: EventId) -> Self {
        Self::fallback(trigger, APOLOGY_REPLY, FallbackReason::Unavailable)
    }

    /// Acknowledgement of a stop request.
    pub fn stopped(trigger: EventId) -> Self {
        Self::fallback(trigger, "Okay, stopping.", FallbackReason::Stopped)
    }

    fn fallback(trigger: EventId, reply: &str, reason: FallbackReason) -> Self {
        Self {
            id: IntentId::new(),
            trigger,
            snapshot: trigger,
            reply: Some(reply.to_string()),
            actions: Vec::new(),
            confidence: 1.0,
            origin: IntentOrigin::Fallback(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.origin, IntentOrigin::Fallback(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::User > Priority::Routine);
        assert!(Priority::Routine > Priority::Background);
    }

    #[test]
    fn terminal_states() {
        assert!(!ActionState::Pending.is_terminal());
        assert!(!ActionState::Dispatched.is_terminal());
        assert!(ActionState::Acknowledged.is_terminal());
        assert!(ActionState::TimedOut.is_terminal());
        assert!(ActionState::TimedOut.is_failure());
        assert!(!ActionState::Superseded.is_failure());
    }

    #[test]
    fn fallbacks_carry_no_actions() {
        let trigger = EventId::new();
        let apology = Intent::apology(trigger);
        assert!(apology.actions.is_empty());
        assert_eq!(apology.reply.as_deref(), Some(APOLOGY_REPLY));
        assert_eq!(apology.origin, IntentOrigin::Fallback(FallbackReason::Unavailable));

        let clarify = Intent::clarification(trigger);
        assert!(clarify.is_fallback());
        assert_eq!(clarify.trigger, trigger);
    }

    #[test]
    fn action_keeps_back_references() {
        let intent = IntentId::new();
        let trigger = EventId::new();
        let action = DeviceAction::new("living-room-light", "power", "on", intent, trigger);
        assert_eq!(action.intent, intent);
        assert_eq!(action.trigger, trigger);
        assert_eq!(action.summary(), "living-room-light power=on");
    }
}

//! Ingress events: the single typed stream every producer feeds.
//!
//! Speech transcripts, presence signals, schedule changes and device
//! acknowledgements arrive from independent producers. Each becomes an
//! immutable [`Event`] whose payload is a tagged union, so consumers match
//! exhaustively instead of inspecting loosely-shaped data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngressError;
use crate::ids::{ActionId, EventId};
use crate::intent::ActionState;

/// Where an event came from. Derived from the payload variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Speech,
    Presence,
    Schedule,
    DeviceAck,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speech => "speech",
            Self::Presence => "presence",
            Self::Schedule => "schedule",
            Self::DeviceAck => "device_ack",
        }
    }
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the speech recognizer for one utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Transcript {
    /// A transcript for text typed or recognized "now" with full confidence.
    pub fn immediate(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            confidence: 1.0,
            started_at: at,
            ended_at: at,
        }
    }
}

/// Occupancy as reported by presence sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Home,
    Away,
    Asleep,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Away => "away",
            Self::Asleep => "asleep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "home" => Some(Self::Home),
            "away" => Some(Self::Away),
            "asleep" => Some(Self::Asleep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSignal {
    pub state: PresenceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// Name of the sensor that produced the reading.
    pub sensor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleChangeKind {
    Added,
    Updated,
    Removed,
    /// The entry's time has arrived (routines fire with this kind).
    Due,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleChange {
    pub entry_id: String,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    pub change: ScheduleChangeKind,
    /// Instruction attached to a routine, forwarded to reasoning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Terminal report of a device action, fed back into the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub action_id: ActionId,
    pub device: String,
    pub capability: String,
    pub state: String,
    pub outcome: ActionState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The strongly-typed payload of an event, one variant per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Speech(Transcript),
    Presence(PresenceSignal),
    Schedule(ScheduleChange),
    DeviceAck(DeviceReport),
}

impl EventPayload {
    pub fn source(&self) -> EventSource {
        match self {
            Self::Speech(_) => EventSource::Speech,
            Self::Presence(_) => EventSource::Presence,
            Self::Schedule(_) => EventSource::Schedule,
            Self::DeviceAck(_) => EventSource::DeviceAck,
        }
    }

    /// Check required fields. Producers get `MalformedEvent` back.
    pub fn validate(&self) -> std::result::Result<(), IngressError> {
        let malformed = |reason: &str| IngressError::MalformedEvent {
            source_kind: self.source().to_string(),
            reason: reason.to_string(),
        };

        match self {
            Self::Speech(t) => {
                if t.text.trim().is_empty() {
                    return Err(malformed("transcript text is empty"));
                }
                if !(0.0..=1.0).contains(&t.confidence) {
                    return Err(malformed("transcript confidence must be within [0, 1]"));
                }
                if t.ended_at < t.started_at {
                    return Err(malformed("transcript ends before it starts"));
                }
            }
            Self::Presence(p) => {
                if p.sensor.trim().is_empty() {
                    return Err(malformed("presence signal has no sensor"));
                }
            }
            Self::Schedule(s) => {
                if s.entry_id.trim().is_empty() {
                    return Err(malformed("schedule entry id is empty"));
                }
                if s.title.trim().is_empty() {
                    return Err(malformed("schedule title is empty"));
                }
                if s.ends_at.is_some_and(|end| end < s.starts_at) {
                    return Err(malformed("schedule entry ends before it starts"));
                }
            }
            Self::DeviceAck(r) => {
                if r.device.trim().is_empty() || r.capability.trim().is_empty() {
                    return Err(malformed("device report needs device and capability"));
                }
            }
        }
        Ok(())
    }
}

/// Who produced an event and how much they trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub producer: String,
    pub confidence: f32,
}

/// An event as submitted by a producer, before the log assigns identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
    pub payload: EventPayload,
}

impl NewEvent {
    pub fn new(payload: EventPayload, producer: impl Into<String>) -> Self {
        let confidence = match &payload {
            EventPayload::Speech(t) => t.confidence,
            _ => 1.0,
        };
        Self {
            timestamp: Utc::now(),
            provenance: Provenance {
                producer: producer.into(),
                confidence,
            },
            payload,
        }
    }

    pub fn speech(transcript: Transcript) -> Self {
        let at = transcript.ended_at;
        Self::new(EventPayload::Speech(transcript), "speech").at(at)
    }

    pub fn presence(signal: PresenceSignal) -> Self {
        Self::new(EventPayload::Presence(signal), "presence")
    }

    pub fn schedule(change: ScheduleChange) -> Self {
        Self::new(EventPayload::Schedule(change), "schedule")
    }

    pub fn device_ack(report: DeviceReport) -> Self {
        Self::new(EventPayload::DeviceAck(report), "orchestrator")
    }

    /// Override the event timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Override the producer name.
    pub fn from_producer(mut self, producer: impl Into<String>) -> Self {
        self.provenance.producer = producer.into();
        self
    }
}

/// An immutable entry of the ingress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Monotonic submission counter; tie-breaker for equal timestamps.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
    pub payload: EventPayload,
}

impl Event {
    pub fn source(&self) -> EventSource {
        self.payload.source()
    }

    /// The log ordering key.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }

    /// Free text carried by the event, used for scope heuristics.
    pub fn text(&self) -> Option<String> {
        match &self.payload {
            EventPayload::Speech(t) => Some(t.text.clone()),
            EventPayload::Schedule(s) => Some(match &s.prompt {
                Some(prompt) => format!("{} {}", s.title, prompt),
                None => s.title.clone(),
            }),
            EventPayload::Presence(_) | EventPayload::DeviceAck(_) => None,
        }
    }

    /// One-line rendering used in prompts and logs.
    pub fn describe(&self) -> String {
        let at = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        match &self.payload {
            EventPayload::Speech(t) => format!("[{at}] user said: \"{}\"", t.text.trim()),
            EventPayload::Presence(p) => match &p.zone {
                Some(zone) => format!("[{at}] presence: {} ({zone})", p.state.as_str()),
                None => format!("[{at}] presence: {}", p.state.as_str()),
            },
            EventPayload::Schedule(s) => {
                let kind = match s.change {
                    ScheduleChangeKind::Added => "added",
                    ScheduleChangeKind::Updated => "updated",
                    ScheduleChangeKind::Removed => "removed",
                    ScheduleChangeKind::Due => "due",
                };
                let starts = s.starts_at.format("%Y-%m-%d %H:%M");
                match &s.prompt {
                    Some(prompt) => format!("[{at}] schedule {kind}: {} at {starts}: {prompt}", s.title),
                    None => format!("[{at}] schedule {kind}: {} at {starts}", s.title),
                }
            }
            EventPayload::DeviceAck(r) => format!(
                "[{at}] device {} {}={} {}",
                r.device,
                r.capability,
                r.state,
                r.outcome.as_str()
            ),
        }
    }
}

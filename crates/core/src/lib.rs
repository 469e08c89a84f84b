//! # Hearth Core
//!
//! Domain types, traits, and error definitions for the Hearth home agent.
//! This crate has no framework dependencies beyond serde/tokio primitives;
//! it defines the domain model every other crate implements against.
//!
//! Every external collaborator (reasoning engine, device layer, speech
//! synthesis) and the portfolio store are traits here. Implementations live
//! in their own crates, so tests swap them for scripted stand-ins.

pub mod bus;
pub mod device;
pub mod error;
pub mod event;
pub mod ids;
pub mod intent;
pub mod portfolio;
pub mod reasoning;
pub mod speech;

// Re-export key types at crate root for ergonomics
pub use bus::{Diagnostic, DiagnosticBus};
pub use device::{DeviceAck, DeviceCommand, DeviceController, DeviceState};
pub use error::{Error, Result};
pub use event::{
    DeviceReport, Event, EventPayload, EventSource, NewEvent, PresenceSignal, PresenceState,
    Provenance, ScheduleChange, ScheduleChangeKind, Transcript,
};
pub use ids::{ActionId, EventId, IntentId};
pub use intent::{ActionState, DeviceAction, FallbackReason, Intent, IntentOrigin, Priority};
pub use portfolio::{PortfolioEntry, PortfolioStore, UpsertMode, UpsertOutcome};
pub use reasoning::{ReasoningEngine, ReasoningRequest};
pub use speech::{SilentVoice, SpeechSynthesizer};

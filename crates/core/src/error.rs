//! Error types for the Hearth domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context (ingress, portfolio, context, reasoning, actions,
//! and the external collaborators) has its own error enum; the top-level
//! [`Error`] wraps them so pipelines can use `?` across contexts.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ids::{ActionId, EventId};

/// The top-level error type for all Hearth operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Ingress error: {0}")]
    Ingress(#[from] IngressError),

    #[error("Portfolio error: {0}")]
    Portfolio(#[from] PortfolioError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Core pipeline errors ---

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IngressError {
    /// The payload is missing a required field or carries an invalid value.
    #[error("Malformed {source_kind} event: {reason}")]
    MalformedEvent { source_kind: String, reason: String },

    #[error("Event log closed")]
    Closed,
}

#[derive(Debug, Clone, Error)]
pub enum PortfolioError {
    /// The write carries a timestamp older than the stored entry.
    #[error("Stale write to '{key}': stored at {stored}, attempted {attempted}")]
    StaleWrite {
        key: String,
        stored: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("Invalid portfolio key '{0}'")]
    InvalidKey(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// Empty portfolio slice and empty recent history.
    #[error("Insufficient context for event {trigger}")]
    InsufficientContext { trigger: EventId },
}

#[derive(Debug, Clone, Error)]
pub enum ReasoningError {
    /// The engine answered but its output does not follow the action schema.
    #[error("Could not parse intent from engine output: {0}")]
    IntentParse(String),

    /// Every attempt timed out or failed.
    #[error("Reasoning engine unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    #[error("Reasoning cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// The device action exhausted its retries.
    #[error("Action {action_id} on {device} failed after {attempts} attempt(s): {reason}")]
    ActionFailed {
        action_id: ActionId,
        device: String,
        attempts: u32,
        reason: String,
    },

    #[error("Action {action_id} rejected: {reason}")]
    Rejected { action_id: ActionId, reason: String },
}

// --- Collaborator errors ---

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Engine request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Engine request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Engine not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    #[error("Device {0} unreachable")]
    Unreachable(String),

    #[error("Device {device} refused command: {reason}")]
    Refused { device: String, reason: String },

    #[error("Unknown device {0}")]
    UnknownDevice(String),
}

#[derive(Debug, Clone, Error)]
pub enum SpeechError {
    #[error("Speech synthesis unavailable: {0}")]
    Unavailable(String),

    #[error("Speech synthesis failed: {0}")]
    Failed(String),
}

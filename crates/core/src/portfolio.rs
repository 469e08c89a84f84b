//! Portfolio trait: the evolving model of the user.
//!
//! The portfolio maps dotted scope keys (`routine.bedtime`,
//! `device.living-room-light.power`) to entries. Entries are never deleted:
//! a newer write supersedes the previous one, which stays in the key's
//! history for auditing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PortfolioError;
use crate::ids::EventId;

/// A single portfolio entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    /// Dotted scope key, e.g. `routine.bedtime`
    pub key: String,

    /// Free-form value
    pub value: serde_json::Value,

    /// Last-write-wins ordering timestamp
    pub updated_at: DateTime<Utc>,

    /// How much the writer trusted this value (0.0–1.0)
    pub confidence: f32,

    /// The event that caused this write
    pub source_event: EventId,

    /// Set when a low-trust write replaced a more trusted value
    #[serde(default)]
    pub needs_confirmation: bool,
}

impl PortfolioEntry {
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        updated_at: DateTime<Utc>,
        source_event: EventId,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            updated_at,
            confidence: 1.0,
            source_event,
            needs_confirmation: false,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Compact value rendering for prompts: strings unquoted, the rest as JSON.
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// How an upsert treats an older timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpsertMode {
    /// Last-write-wins; older writes fail with `StaleWrite`.
    #[default]
    Normal,
    /// Overwrite regardless of timestamps (explicit corrections).
    Force,
}

/// What an accepted upsert did.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// The entry now stored under the key.
    pub stored: PortfolioEntry,
    /// The entry it superseded, if any.
    pub superseded: Option<PortfolioEntry>,
}

/// Validate a dotted scope key: non-empty segments of `[a-z0-9_-]`.
pub fn validate_key(key: &str) -> std::result::Result<(), PortfolioError> {
    let valid = !key.is_empty()
        && key.split('.').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(PortfolioError::InvalidKey(key.to_string()))
    }
}

/// Whether `key` lies within `scope`: equal, or below it at a segment boundary.
pub fn scope_matches(scope: &str, key: &str) -> bool {
    if scope.is_empty() {
        return true;
    }
    key == scope || (key.starts_with(scope) && key[scope.len()..].starts_with('.'))
}

/// The core PortfolioStore trait.
///
/// Implementations: in-memory and JSONL file journal. All upserts are
/// serialized so two writers can never leave a key in a torn state, and
/// readers always observe whole entries.
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    /// The backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Get the current entry for a key.
    async fn get(&self, key: &str) -> std::result::Result<Option<PortfolioEntry>, PortfolioError>;

    /// All current entries within a scope, ordered by key.
    async fn get_prefix(&self, scope: &str) -> std::result::Result<Vec<PortfolioEntry>, PortfolioError>;

    /// Insert or supersede an entry.
    async fn upsert(
        &self,
        entry: PortfolioEntry,
        mode: UpsertMode,
    ) -> std::result::Result<UpsertOutcome, PortfolioError>;

    /// Superseded entries for a key, oldest first (current entry excluded).
    async fn history(&self, key: &str) -> std::result::Result<Vec<PortfolioEntry>, PortfolioError>;

    /// Entries flagged for confirmation, ordered by key.
    async fn pending_confirmations(&self) -> std::result::Result<Vec<PortfolioEntry>, PortfolioError>;

    /// Number of distinct keys.
    async fn len(&self) -> std::result::Result<usize, PortfolioError>;
}

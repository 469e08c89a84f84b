//! File-based portfolio: an append-only JSON-lines journal.
//!
//! Every accepted write is appended as one [`JournalRecord`]. Opening the
//! store replays the journal in order, so the current view and the per-key
//! history survive restarts. Lines that fail to parse are skipped.
//!
//! Default location: `~/.hearth/portfolio.jsonl`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_core::error::PortfolioError;
use hearth_core::portfolio::{PortfolioEntry, PortfolioStore, UpsertMode, UpsertOutcome};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::ledger::{DEFAULT_LOW_TRUST_THRESHOLD, Ledger};

/// One line of the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub entry: PortfolioEntry,
    #[serde(default)]
    pub forced: bool,
    pub recorded_at: DateTime<Utc>,
}

pub struct FilePortfolio {
    path: PathBuf,
    ledger: RwLock<Ledger>,
    low_trust_threshold: f32,
}

impl FilePortfolio {
    /// Open (or start) the journal at `path`.
    ///
    /// A missing file starts empty; it is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PortfolioError> {
        let path = path.into();
        let ledger = Self::replay(&path)?;
        debug!(path = %path.display(), keys = ledger.len(), "Portfolio journal loaded");
        Ok(Self {
            path,
            ledger: RwLock::new(ledger),
            low_trust_threshold: DEFAULT_LOW_TRUST_THRESHOLD,
        })
    }

    pub fn with_low_trust_threshold(mut self, threshold: f32) -> Self {
        self.low_trust_threshold = threshold;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(path: &Path) -> Result<Ledger, PortfolioError> {
        let mut ledger = Ledger::default();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ledger),
            Err(e) => {
                return Err(PortfolioError::Storage(format!(
                    "Failed to read portfolio journal {}: {e}",
                    path.display()
                )));
            }
        };

        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) => {
                    ledger.restore(record.entry);
                }
                Err(e) => {
                    warn!(line = lineno + 1, error = %e, "Skipping corrupted journal record");
                }
            }
        }
        Ok(ledger)
    }

    fn append(&self, record: &JournalRecord) -> Result<(), PortfolioError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PortfolioError::Storage(format!("Failed to create portfolio directory: {e}"))
            })?;
        }

        let mut line = serde_json::to_string(record).map_err(|e| {
            PortfolioError::Storage(format!("Failed to serialize journal record: {e}"))
        })?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PortfolioError::Storage(format!("Failed to open portfolio journal: {e}")))?;
        file.write_all(line.as_bytes())
            .map_err(|e| PortfolioError::Storage(format!("Failed to write portfolio journal: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl PortfolioStore for FilePortfolio {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<PortfolioEntry>, PortfolioError> {
        Ok(self.ledger.read().await.get(key))
    }

    async fn get_prefix(&self, scope: &str) -> Result<Vec<PortfolioEntry>, PortfolioError> {
        Ok(self.ledger.read().await.scope(scope))
    }

    async fn upsert(
        &self,
        entry: PortfolioEntry,
        mode: UpsertMode,
    ) -> Result<UpsertOutcome, PortfolioError> {
        // Journal first, then install, all under the write lock: line order
        // matches acceptance order and a failed append changes nothing.
        let mut ledger = self.ledger.write().await;
        let accepted = ledger.check(entry, mode, self.low_trust_threshold)?;
        self.append(&JournalRecord {
            entry: accepted.clone(),
            forced: mode == UpsertMode::Force,
            recorded_at: Utc::now(),
        })?;
        Ok(ledger.restore(accepted))
    }

    async fn history(&self, key: &str) -> Result<Vec<PortfolioEntry>, PortfolioError> {
        Ok(self.ledger.read().await.history(key))
    }

    async fn pending_confirmations(&self) -> Result<Vec<PortfolioEntry>, PortfolioError> {
        Ok(self.ledger.read().await.pending_confirmations())
    }

    async fn len(&self) -> Result<usize, PortfolioError> {
        Ok(self.ledger.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hearth_core::ids::EventId;

    fn entry(key: &str, value: serde_json::Value, at: DateTime<Utc>) -> PortfolioEntry {
        PortfolioEntry::new(key, value, at, EventId::new())
    }

    #[tokio::test]
    async fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.jsonl");
        let now = Utc::now();

        let store = FilePortfolio::open(&path).unwrap();
        store
            .upsert(entry("routine.bedtime", serde_json::json!({"hour": 22}), now), UpsertMode::Normal)
            .await
            .unwrap();
        store
            .upsert(
                entry("routine.bedtime", serde_json::json!({"hour": 23}), now + Duration::seconds(1)),
                UpsertMode::Normal,
            )
            .await
            .unwrap();
        drop(store);

        let reopened = FilePortfolio::open(&path).unwrap();
        let stored = reopened.get("routine.bedtime").await.unwrap().unwrap();
        assert_eq!(stored.value["hour"], 23);
        assert_eq!(reopened.history("routine.bedtime").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stale_write_not_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.jsonl");
        let now = Utc::now();

        let store = FilePortfolio::open(&path).unwrap();
        store
            .upsert(entry("presence.state", serde_json::json!("home"), now), UpsertMode::Normal)
            .await
            .unwrap();
        let err = store
            .upsert(
                entry("presence.state", serde_json::json!("away"), now - Duration::minutes(1)),
                UpsertMode::Normal,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::StaleWrite { .. }));

        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 1);
    }

    #[tokio::test]
    async fn forced_write_is_marked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.jsonl");
        let now = Utc::now();

        let store = FilePortfolio::open(&path).unwrap();
        store
            .upsert(entry("preference.light", serde_json::json!("warm"), now), UpsertMode::Normal)
            .await
            .unwrap();
        store
            .upsert(
                entry("preference.light", serde_json::json!("cool"), now - Duration::hours(1)),
                UpsertMode::Force,
            )
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let last: JournalRecord = serde_json::from_str(content.lines().last().unwrap()).unwrap();
        assert!(last.forced);
        assert_eq!(last.entry.value_text(), "cool");
    }

    #[tokio::test]
    async fn corrupted_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.jsonl");

        let good = JournalRecord {
            entry: entry("preference.music", serde_json::json!("jazz"), Utc::now()),
            forced: false,
            recorded_at: Utc::now(),
        };
        let content = format!(
            "{}\nthis is not json\n\n{}\n",
            serde_json::to_string(&good).unwrap(),
            serde_json::to_string(&JournalRecord {
                entry: entry("presence.state", serde_json::json!("away"), Utc::now()),
                ..good.clone()
            })
            .unwrap()
        );
        std::fs::write(&path, content).unwrap();

        let store = FilePortfolio::open(&path).unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.get_prefix("preference").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePortfolio::open(dir.path().join("nested/portfolio.jsonl")).unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
        store
            .upsert(entry("presence.zone", serde_json::json!("kitchen"), Utc::now()), UpsertMode::Normal)
            .await
            .unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn failed_append_leaves_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.jsonl");
        let now = Utc::now();

        let store = FilePortfolio::open(&path).unwrap();
        store
            .upsert(entry("routine.bedtime", serde_json::json!("22:00"), now), UpsertMode::Normal)
            .await
            .unwrap();

        // A directory where the journal should be makes the append fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let result = store
            .upsert(
                entry("routine.bedtime", serde_json::json!("22:30"), now + Duration::seconds(1)),
                UpsertMode::Normal,
            )
            .await;
        assert!(matches!(result, Err(PortfolioError::Storage(_))));

        let stored = store.get("routine.bedtime").await.unwrap().unwrap();
        assert_eq!(stored.value, serde_json::json!("22:00"));
        assert_eq!(store.history("routine.bedtime").await.unwrap().len(), 1);

        let fresh = store
            .upsert(entry("preference.light", serde_json::json!("warm"), now), UpsertMode::Normal)
            .await;
        assert!(fresh.is_err());
        assert!(store.get("preference.light").await.unwrap().is_none());
    }
}

//! In-memory portfolio: useful for tests and ephemeral sessions.

use async_trait::async_trait;
use hearth_core::error::PortfolioError;
use hearth_core::portfolio::{PortfolioEntry, PortfolioStore, UpsertMode, UpsertOutcome};
use tokio::sync::RwLock;

use crate::ledger::{DEFAULT_LOW_TRUST_THRESHOLD, Ledger};

/// A portfolio that lives only as long as the process.
pub struct InMemoryPortfolio {
    ledger: RwLock<Ledger>,
    low_trust_threshold: f32,
}

impl InMemoryPortfolio {
    pub fn new() -> Self {
        Self {
            ledger: RwLock::new(Ledger::default()),
            low_trust_threshold: DEFAULT_LOW_TRUST_THRESHOLD,
        }
    }

    pub fn with_low_trust_threshold(mut self, threshold: f32) -> Self {
        self.low_trust_threshold = threshold;
        self
    }
}

impl Default for InMemoryPortfolio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortfolioStore for InMemoryPortfolio {
    fn name(&self) -> &str {
        "in_memory"
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
        self.ledger
            .write()
            .await
            .apply(entry, mode, self.low_trust_threshold)
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
    use chrono::{Duration, Utc};
    use hearth_core::ids::EventId;
    use std::sync::Arc;

    #[tokio::test]
    async fn upsert_and_get() {
        let store = InMemoryPortfolio::new();
        let entry = PortfolioEntry::new(
            "routine.bedtime",
            serde_json::json!({"hour": 22}),
            Utc::now(),
            EventId::new(),
        );
        let outcome = store.upsert(entry.clone(), UpsertMode::Normal).await.unwrap();
        assert!(outcome.superseded.is_none());
        assert_eq!(store.get("routine.bedtime").await.unwrap(), Some(entry));
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get("routine.wake").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_upserts_keep_newest() {
        let store = Arc::new(InMemoryPortfolio::new());
        let base = Utc::now();
        let mut handles = Vec::new();

        // Spawn in reverse timestamp order so most writes race a newer one
        for i in (0..32i64).rev() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let entry = PortfolioEntry::new(
                    "preference.temperature",
                    serde_json::json!(i),
                    base + Duration::seconds(i),
                    EventId::new(),
                );
                store.upsert(entry, UpsertMode::Normal).await
            }));
        }

        let mut stale = 0;
        for h in handles {
            if h.await.unwrap().is_err() {
                stale += 1;
            }
        }

        let stored = store.get("preference.temperature").await.unwrap().unwrap();
        assert_eq!(stored.value, serde_json::json!(31));
        assert_eq!(stored.updated_at, base + Duration::seconds(31));
        let history = store.history("preference.temperature").await.unwrap();
        assert_eq!(history.len() + stale, 32);
    }
}

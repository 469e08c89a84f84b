//! Last-write-wins ledger shared by every backend.

use hearth_core::error::PortfolioError;
use hearth_core::portfolio::{
    PortfolioEntry, UpsertMode, UpsertOutcome, scope_matches, validate_key,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

pub(crate) const DEFAULT_LOW_TRUST_THRESHOLD: f32 = 0.5;

#[derive(Debug, Default)]
pub(crate) struct Ledger {
    current: BTreeMap<String, PortfolioEntry>,
    /// Every accepted version per key, oldest first
    history: HashMap<String, Vec<PortfolioEntry>>,
}

impl Ledger {
    /// Decide whether `entry` may replace the stored value and apply it.
    pub(crate) fn apply(
        &mut self,
        entry: PortfolioEntry,
        mode: UpsertMode,
        low_trust_threshold: f32,
    ) -> Result<UpsertOutcome, PortfolioError> {
        let accepted = self.check(entry, mode, low_trust_threshold)?;
        Ok(self.restore(accepted))
    }

    /// Decide whether `entry` may replace the stored value without
    /// installing it. Returns the entry as it would be stored.
    pub(crate) fn check(
        &self,
        mut entry: PortfolioEntry,
        mode: UpsertMode,
        low_trust_threshold: f32,
    ) -> Result<PortfolioEntry, PortfolioError> {
        validate_key(&entry.key)?;

        if let Some(stored) = self.current.get(&entry.key) {
            match mode {
                UpsertMode::Normal if entry.updated_at < stored.updated_at => {
                    return Err(PortfolioError::StaleWrite {
                        key: entry.key,
                        stored: stored.updated_at,
                        attempted: entry.updated_at,
                    });
                }
                UpsertMode::Normal => {}
                UpsertMode::Force => {
                    info!(key = %entry.key, previous = %stored.value_text(), value = %entry.value_text(), "Forced portfolio overwrite");
                }
            }

            if entry.confidence < stored.confidence && entry.confidence < low_trust_threshold {
                warn!(
                    key = %entry.key,
                    confidence = entry.confidence,
                    stored_confidence = stored.confidence,
                    "Low-trust write flagged for confirmation"
                );
                entry.needs_confirmation = true;
            }
        }

        Ok(entry)
    }

    /// Install an already accepted entry (journal replay).
    pub(crate) fn restore(&mut self, entry: PortfolioEntry) -> UpsertOutcome {
        self.history
            .entry(entry.key.clone())
            .or_default()
            .push(entry.clone());
        let superseded = self.current.insert(entry.key.clone(), entry.clone());
        UpsertOutcome {
            stored: entry,
            superseded,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<PortfolioEntry> {
        self.current.get(key).cloned()
    }

    /// Current entries under `scope`, ordered by key.
    pub(crate) fn scope(&self, scope: &str) -> Vec<PortfolioEntry> {
        self.current
            .range(scope.to_string()..)
            .take_while(|(key, _)| key.starts_with(scope))
            .filter(|(key, _)| scope_matches(scope, key))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub(crate) fn history(&self, key: &str) -> Vec<PortfolioEntry> {
        self.history.get(key).cloned().unwrap_or_default()
    }

    pub(crate) fn pending_confirmations(&self) -> Vec<PortfolioEntry> {
        self.current
            .values()
            .filter(|e| e.needs_confirmation)
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.current.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use hearth_core::ids::EventId;
    use proptest::prelude::*;

    fn entry(key: &str, value: &str, at: DateTime<Utc>) -> PortfolioEntry {
        PortfolioEntry::new(key, serde_json::json!(value), at, EventId::new())
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn older_write_is_stale() {
        let mut ledger = Ledger::default();
        ledger.apply(entry("routine.bedtime", "22:30", t(10)), UpsertMode::Normal, 0.5).unwrap();
        let err = ledger
            .apply(entry("routine.bedtime", "21:00", t(5)), UpsertMode::Normal, 0.5)
            .unwrap_err();
        assert!(matches!(err, PortfolioError::StaleWrite { .. }));
        assert_eq!(ledger.get("routine.bedtime").unwrap().value_text(), "22:30");
    }

    #[test]
    fn check_leaves_the_ledger_untouched() {
        let mut ledger = Ledger::default();
        ledger.apply(entry("preference.light", "warm", t(1)), UpsertMode::Normal, 0.5).unwrap();
        let accepted = ledger
            .check(entry("preference.light", "cool", t(2)).with_confidence(0.3), UpsertMode::Normal, 0.5)
            .unwrap();
        assert!(accepted.needs_confirmation);
        assert_eq!(ledger.get("preference.light").unwrap().value_text(), "warm");
        assert_eq!(ledger.history("preference.light").len(), 1);
    }

    #[test]
    fn equal_timestamp_later_arrival_wins() {
        let mut ledger = Ledger::default();
        ledger.apply(entry("preference.light", "warm", t(1)), UpsertMode::Normal, 0.5).unwrap();
        let outcome = ledger
            .apply(entry("preference.light", "cool", t(1)), UpsertMode::Normal, 0.5)
            .unwrap();
        assert_eq!(outcome.superseded.unwrap().value_text(), "warm");
        assert_eq!(ledger.get("preference.light").unwrap().value_text(), "cool");
    }

    #[test]
    fn force_overrides_timestamps() {
        let mut ledger = Ledger::default();
        ledger.apply(entry("routine.bedtime", "22:30", t(10)), UpsertMode::Normal, 0.5).unwrap();
        ledger.apply(entry("routine.bedtime", "21:00", t(5)), UpsertMode::Force, 0.5).unwrap();
        assert_eq!(ledger.get("routine.bedtime").unwrap().value_text(), "21:00");
        assert_eq!(ledger.history("routine.bedtime").len(), 2);
    }

    #[test]
    fn low_trust_write_flagged() {
        let mut ledger = Ledger::default();
        ledger.apply(entry("preference.light", "warm", t(1)), UpsertMode::Normal, 0.5).unwrap();
        let outcome = ledger
            .apply(
                entry("preference.light", "cool", t(2)).with_confidence(0.3),
                UpsertMode::Normal,
                0.5,
            )
            .unwrap();
        assert!(outcome.stored.needs_confirmation);
        assert_eq!(ledger.pending_confirmations().len(), 1);

        // A confident correction clears it
        ledger.apply(entry("preference.light", "cool", t(3)), UpsertMode::Normal, 0.5).unwrap();
        assert!(ledger.pending_confirmations().is_empty());
    }

    #[test]
    fn scope_lookup_is_segment_aware_and_sorted() {
        let mut ledger = Ledger::default();
        for key in ["routine.wake", "routines.other", "routine", "routine.bedtime", "presence.state"] {
            ledger.apply(entry(key, "x", t(0)), UpsertMode::Normal, 0.5).unwrap();
        }
        let keys: Vec<String> = ledger.scope("routine").into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["routine", "routine.bedtime", "routine.wake"]);
    }

    #[test]
    fn invalid_key_rejected() {
        let mut ledger = Ledger::default();
        assert!(matches!(
            ledger.apply(entry("Bad Key", "x", t(0)), UpsertMode::Normal, 0.5),
            Err(PortfolioError::InvalidKey(_))
        ));
    }

    proptest! {
        #[test]
        fn last_write_wins_regardless_of_arrival(stamps in prop::collection::vec(0i64..50, 1..40)) {
            let mut ledger = Ledger::default();
            for (i, s) in stamps.iter().enumerate() {
                let _ = ledger.apply(entry("routine.bedtime", &i.to_string(), t(*s)), UpsertMode::Normal, 0.5);
            }

            let max = *stamps.iter().max().unwrap();
            let winner = stamps.iter().rposition(|s| *s == max).unwrap();
            let stored = ledger.get("routine.bedtime").unwrap();
            prop_assert_eq!(stored.updated_at, t(max));
            prop_assert_eq!(stored.value_text(), winner.to_string());

            // Accepted history never goes back in time
            let history = ledger.history("routine.bedtime");
            prop_assert!(history.windows(2).all(|w| w[0].updated_at <= w[1].updated_at));
        }
    }
}

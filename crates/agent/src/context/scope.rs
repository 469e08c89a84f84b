//! Scope heuristics: which parts of the portfolio matter for an event.

use hearth_config::{ContextConfig, ScopeRule};
use hearth_core::event::{Event, EventPayload};
use std::collections::BTreeSet;

/// Maps a triggering event to the portfolio scopes worth reading.
#[derive(Debug, Clone)]
pub struct ScopeSelector {
    rules: Vec<ScopeRule>,
    always: Vec<String>,
}

impl ScopeSelector {
    pub fn new(rules: Vec<ScopeRule>, always: Vec<String>) -> Self {
        Self { rules, always }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.scope_rules.clone(), config.always_scopes.clone())
    }

    /// Scopes for `event`, sorted and deduplicated.
    pub fn select(&self, event: &Event) -> Vec<String> {
        let mut scopes: BTreeSet<String> = self.always.iter().cloned().collect();

        let defaults: &[&str] = match &event.payload {
            EventPayload::Speech(_) => &["interaction"],
            EventPayload::Schedule(_) => &["routine", "schedule"],
            EventPayload::Presence(_) => &["presence", "routine"],
            EventPayload::DeviceAck(_) => &["device"],
        };
        scopes.extend(defaults.iter().map(|s| s.to_string()));

        if let Some(text) = event.text() {
            scopes.extend(self.keyword_scopes(&text));
        }

        scopes.into_iter().collect()
    }

    fn keyword_scopes(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        let words: BTreeSet<&str> = normalized.split(' ').collect();

        self.rules
            .iter()
            .filter(|rule| {
                rule.keywords.iter().any(|kw| {
                    let kw = normalize(kw);
                    if kw.contains(' ') {
                        // Phrase keywords match on word boundaries
                        format!(" {normalized} ").contains(&format!(" {kw} "))
                    } else {
                        words.contains(kw.as_str())
                    }
                })
            })
            .flat_map(|rule| rule.scopes.iter().cloned())
            .collect()
    }
}

/// Lowercase, punctuation to spaces, single-spaced.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hearth_core::event::{PresenceSignal, PresenceState, ScheduleChange, ScheduleChangeKind, Transcript};
    use hearth_core::ids::EventId;
    use hearth_core::event::Provenance;

    fn event(payload: EventPayload) -> Event {
        Event {
            id: EventId::new(),
            sequence: 0,
            timestamp: Utc::now(),
            provenance: Provenance {
                producer: "test".into(),
                confidence: 1.0,
            },
            payload,
        }
    }

    fn selector() -> ScopeSelector {
        ScopeSelector::from_config(&ContextConfig::default())
    }

    #[test]
    fn bedtime_utterance_selects_routine() {
        let ev = event(EventPayload::Speech(Transcript::immediate(
            "I'm going to bed, good night!",
            Utc::now(),
        )));
        let scopes = selector().select(&ev);
        assert!(scopes.contains(&"routine".to_string()));
        assert!(scopes.contains(&"presence".to_string()));
        assert!(scopes.contains(&"preference".to_string()));
        assert!(scopes.contains(&"interaction".to_string()));
        assert!(!scopes.contains(&"schedule".to_string()));
    }

    #[test]
    fn keywords_match_whole_words_only() {
        // "fanatic" must not pull in the fan rule
        let ev = event(EventPayload::Speech(Transcript::immediate(
            "I'm a fanatic about jazz",
            Utc::now(),
        )));
        assert!(!selector().select(&ev).contains(&"device".to_string()));
    }

    #[test]
    fn phrase_keywords_match() {
        let sel = ScopeSelector::new(
            vec![ScopeRule {
                keywords: vec!["movie night".into()],
                scopes: vec!["preference.media".into()],
            }],
            vec![],
        );
        let ev = event(EventPayload::Speech(Transcript::immediate(
            "It's movie night!",
            Utc::now(),
        )));
        assert!(sel.select(&ev).contains(&"preference.media".to_string()));
    }

    #[test]
    fn source_defaults() {
        let schedule = event(EventPayload::Schedule(ScheduleChange {
            entry_id: "routine.bedtime".into(),
            title: "bedtime".into(),
            starts_at: Utc::now(),
            ends_at: None,
            change: ScheduleChangeKind::Due,
            prompt: None,
        }));
        let scopes = selector().select(&schedule);
        assert!(scopes.contains(&"routine".to_string()));
        assert!(scopes.contains(&"schedule".to_string()));

        let presence = event(EventPayload::Presence(PresenceSignal {
            state: PresenceState::Home,
            zone: None,
            sensor: "door".into(),
        }));
        assert!(selector().select(&presence).contains(&"routine".to_string()));
    }

    #[test]
    fn output_is_sorted_and_unique() {
        let ev = event(EventPayload::Speech(Transcript::immediate(
            "lights lights lights at night",
            Utc::now(),
        )));
        let scopes = selector().select(&ev);
        let mut sorted = scopes.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(scopes, sorted);
    }
}

//! Context assembly: pick the bounded slice of the world reasoning sees.
//!
//! Three sections are filled against a token budget, in priority order:
//!
//! | Section | Source | Trim strategy |
//! |---------|--------|---------------|
//! | 1. Portfolio | scope-matched entries | entry cap, then later keys dropped |
//! | 2. Device states | known-state cache | later devices dropped |
//! | 3. Recent events | event log, newest within the window | oldest dropped first |
//!
//! # Determinism
//!
//! Output depends only on the trigger, the portfolio, the log and the state
//! cache. The recent-events window is measured from the trigger's timestamp,
//! never from the wall clock.

use hearth_config::ContextConfig;
use hearth_core::device::DeviceState;
use hearth_core::error::ContextError;
use hearth_core::event::Event;
use hearth_core::portfolio::{PortfolioEntry, PortfolioStore};
use hearth_ingress::EventLog;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::scope::ScopeSelector;
use crate::context::snapshot::{AssemblyMetadata, ContextSnapshot, DropInfo, SectionStats};
use crate::context::token;
use crate::states::KnownStates;

/// Bounds applied during assembly.
#[derive(Debug, Clone)]
pub struct ContextLimits {
    /// Most recent events included
    pub recent_events: usize,
    /// How far back from the trigger recent events may reach
    pub window: chrono::Duration,
    pub max_entries: usize,
    pub token_budget: usize,
}

impl From<&ContextConfig> for ContextLimits {
    fn from(config: &ContextConfig) -> Self {
        Self {
            recent_events: config.recent_events,
            window: config.window(),
            max_entries: config.max_entries,
            token_budget: config.token_budget,
        }
    }
}

pub struct ContextAssembler {
    store: Arc<dyn PortfolioStore>,
    log: Arc<EventLog>,
    states: Arc<KnownStates>,
    scopes: ScopeSelector,
    limits: ContextLimits,
    devices: String,
}

/// Output of filling one section.
struct Filled<T> {
    items: Vec<T>,
    stats: SectionStats,
    dropped: Option<DropInfo>,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn PortfolioStore>,
        log: Arc<EventLog>,
        states: Arc<KnownStates>,
        scopes: ScopeSelector,
        limits: ContextLimits,
    ) -> Self {
        Self {
            store,
            log,
            states,
            scopes,
            limits,
            devices: String::new(),
        }
    }

    /// Device catalog included in every snapshot.
    pub fn with_device_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.devices = catalog.into();
        self
    }

    /// Fallback when [`assemble`](Self::assemble) finds nothing relevant.
    pub fn minimal(&self, trigger: Arc<Event>) -> ContextSnapshot {
        ContextSnapshot::minimal(trigger, self.devices.clone())
    }

    pub async fn assemble(&self, trigger: &Arc<Event>) -> Result<ContextSnapshot, ContextError> {
        let scopes = self.scopes.select(trigger);

        let mut selected: BTreeMap<String, PortfolioEntry> = BTreeMap::new();
        for scope in &scopes {
            match self.store.get_prefix(scope).await {
                Ok(entries) => {
                    for entry in entries {
                        selected.insert(entry.key.clone(), entry);
                    }
                }
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Portfolio read failed, skipping scope");
                }
            }
        }

        let recent = self
            .log
            .recent(trigger, self.limits.window, self.limits.recent_events);

        if selected.is_empty() && recent.is_empty() {
            debug!(event_id = %trigger.id, "No portfolio or history for trigger");
            return Err(ContextError::InsufficientContext {
                trigger: trigger.id,
            });
        }

        let mut drops = Vec::new();
        let mut entries: Vec<PortfolioEntry> = selected.into_values().collect();
        if entries.len() > self.limits.max_entries {
            let cut = entries.split_off(self.limits.max_entries);
            drops.push(DropInfo {
                section: "portfolio".into(),
                items_dropped: cut.len(),
                tokens_dropped: cut
                    .iter()
                    .map(|e| token::estimate_tokens(&token::render_entry(e)))
                    .sum(),
                reason: "Entry cap reached".into(),
            });
        }

        let mut remaining = self.limits.token_budget;

        let portfolio = fill("portfolio", entries, remaining, |e| {
            token::render_entry(e)
        });
        remaining -= portfolio.stats.tokens;

        let states = fill("device_states", self.states.snapshot(), remaining, |s: &DeviceState| {
            token::render_device_state(s)
        });
        remaining -= states.stats.tokens;

        // Newest first so the oldest are the ones dropped
        let newest_first: Vec<Arc<Event>> = recent.into_iter().rev().collect();
        let mut events = fill("recent_events", newest_first, remaining, |e: &Arc<Event>| {
            token::render_event(e)
        });
        events.items.reverse();

        let sections = vec![
            portfolio.stats.clone(),
            states.stats.clone(),
            events.stats.clone(),
        ];
        drops.extend(
            [portfolio.dropped, states.dropped, events.dropped]
                .into_iter()
                .flatten(),
        );

        let total_tokens = sections.iter().map(|s| s.tokens).sum();
        let metadata = AssemblyMetadata {
            scopes,
            total_tokens,
            budget: self.limits.token_budget,
            sections,
            drops,
            minimal: false,
        };

        debug!(
            event_id = %trigger.id,
            entries = portfolio.items.len(),
            states = states.items.len(),
            events = events.items.len(),
            tokens = total_tokens,
            "Context assembled"
        );

        Ok(ContextSnapshot::new(
            trigger.clone(),
            portfolio.items,
            events.items,
            states.items,
            self.devices.clone(),
            metadata,
        ))
    }
}

/// Include items in order while they fit in `budget`; record the rest.
fn fill<T>(
    section: &str,
    items: Vec<T>,
    budget: usize,
    render: impl Fn(&T) -> String,
) -> Filled<T> {
    let total = items.len();
    let mut used = 0;
    let mut kept = Vec::new();
    let mut dropped = 0;
    let mut dropped_tokens = 0;

    for item in items {
        let cost = token::estimate_tokens(&render(&item));
        if used + cost <= budget {
            used += cost;
            kept.push(item);
        } else {
            dropped += 1;
            dropped_tokens += cost;
        }
    }

    let stats = SectionStats {
        name: section.into(),
        tokens: used,
        items_included: kept.len(),
        items_total: total,
    };
    let dropped = (dropped > 0).then(|| DropInfo {
        section: section.into(),
        items_dropped: dropped,
        tokens_dropped: dropped_tokens,
        reason: "Token budget exhausted".into(),
    });

    Filled {
        items: kept,
        stats,
        dropped,
    }
}

//! The Hearth agent: from ingress event to acknowledged device change.
//!
//! Each event flows through four stages:
//!
//! 1. **Assemble** a bounded [`ContextSnapshot`] from the portfolio, recent
//!    events and known device states
//! 2. **Reason** over the snapshot with a retrying, timeout-bounded engine call
//! 3. **Orchestrate** the resulting actions: conflict resolution per device,
//!    retries with backoff, acknowledgement tracking
//! 4. **Update** the portfolio with what happened
//!
//! The [`Runtime`] wires the stages together and runs one pipeline per event.

pub mod context;
pub mod orchestrator;
pub mod reasoning;
pub mod runtime;
pub mod states;
pub mod updater;

#[cfg(test)]
mod test_support;

pub use context::{
    AssemblyMetadata, ContextAssembler, ContextLimits, ContextSnapshot, DropInfo, ScopeSelector,
    SectionStats,
};
pub use orchestrator::{
    ActionHandle, ActionOrchestrator, ActionRecord, AttemptOutcome, AttemptRecord,
    OrchestratorSettings,
};
pub use reasoning::{DEFAULT_PERSONA, ReasoningDispatcher, ReplyFilter, ReplySink};
pub use runtime::{Runtime, RuntimeSettings, TurnOutcome, priority_for};
pub use states::KnownStates;
pub use updater::{PortfolioUpdater, UpdaterHandle};

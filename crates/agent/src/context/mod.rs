//! Context assembly.
//!
//! Turns a triggering event into an immutable [`ContextSnapshot`]: the
//! portfolio entries whose scopes the event touches, recent history and the
//! known device states, bounded by counts and a token budget.

pub mod assembler;
pub mod scope;
pub mod snapshot;
pub mod token;

pub use assembler::{ContextAssembler, ContextLimits};
pub use scope::ScopeSelector;
pub use snapshot::{AssemblyMetadata, ContextSnapshot, DropInfo, SectionStats};

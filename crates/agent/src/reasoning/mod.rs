//! Reasoning: invoking the engine and turning its text into an [`Intent`].
//!
//! [`Intent`]: hearth_core::intent::Intent

pub mod dispatcher;
pub mod parser;

pub use dispatcher::{DEFAULT_PERSONA, ReasoningDispatcher, ReplySink};
pub use parser::{ACTION_SCHEMA, ActionDirective, Directives, ParseError, ReplyFilter};

//! Event ingress for Hearth.
//!
//! Every producer (speech recognizer, presence sensors, schedule feeds, the
//! action orchestrator) submits typed events here. The log assigns a
//! monotonic sequence, keeps events ordered by `(timestamp, sequence)` and
//! notifies the runtime over an unbounded feed.
//!
//! The [`RoutineScheduler`] is the built-in schedule producer: it turns
//! cron-configured routines into `Schedule` events.

pub mod cron;
pub mod log;
pub mod scheduler;

pub use cron::CronExpr;
pub use log::{EventFeed, EventLog};
pub use scheduler::{RoutineScheduler, SchedulerError};

//! Recurring broadcast scheduling
//!
//! This module decides when templated broadcasts should go live:
//! - Daily and weekly recurrence rules with strictly-forward next runs
//! - A periodic synchronizer that triggers due templates and advances
//!   their schedules whether or not the trigger succeeded

pub mod recurrence;
pub mod synchronizer;

pub use recurrence::{
    RecurrenceError, RecurrencePattern, RecurrenceResult, RecurrenceRule,
};

pub use synchronizer::{
    BroadcastLauncher, BroadcastTemplate, Misfire, ScheduleSynchronizer, SweepOutcome,
    SynchronizerError, SynchronizerResult, TemplateStore,
};

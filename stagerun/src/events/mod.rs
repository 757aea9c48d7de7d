//! Run events for observability.
//!
//! The executor reports every level and stage transition to an
//! [`EventSink`]. Payloads are JSON objects carrying at least the stage name
//! (for stage events) or the level index (for level events).

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A level's stages are about to be submitted.
pub const LEVEL_STARTED: &str = "level.started";
/// A stale stage's command is about to run.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage was fresh and did not run.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// A stage ran and its record was submitted.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage failed.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage was never started because the run stopped early.
pub const STAGE_NOT_ATTEMPTED: &str = "stage.not_attempted";
/// The run finished, successfully or not.
pub const RUN_COMPLETED: &str = "run.completed";

//! Core domain model types for stagerun.

mod status;

pub use status::StageStatus;

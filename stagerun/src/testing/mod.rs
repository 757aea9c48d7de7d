//! Testing utilities for stagerun pipelines.
//!
//! This module provides:
//! - A scripted command runner that writes outputs, fails on demand and
//!   records every invocation
//! - Small workspace helpers for building fixture trees

mod runners;
mod workspace;

pub use runners::ScriptedRunner;
pub use workspace::TestWorkspace;

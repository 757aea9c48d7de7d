//! # Stagerun
//!
//! A local, parallel, hash-based incremental build engine for declarative
//! pipelines.
//!
//! A pipeline is a set of named stages, each with a shell command, the paths
//! it reads and the paths it writes. Stagerun provides:
//!
//! - **Graph building**: edges derived from matching outputs to dependencies,
//!   cycle detection, and a partition into ordered execution levels
//! - **Content fingerprints**: MD5 of files and of directory listings
//! - **Freshness**: skip a stage when its command and every fingerprint
//!   match the last recorded build
//! - **Bounded parallel execution** per level with fail-fast semantics
//! - **A durable manifest**: concurrent updates serialized through one writer
//!   and committed with an atomic rename
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagerun::prelude::*;
//!
//! let engine = Engine::from_config(EngineConfig::new("."))?;
//!
//! // Bring every stage up to date
//! let report = engine.run(&[], false).await?;
//! if let Some(failure) = report.failure() {
//!     eprintln!("{failure}");
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod executor;
pub mod freshness;
pub mod graph;
pub mod hashing;
pub mod manifest;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod testing;
pub mod validate;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::core::StageStatus;
    pub use crate::engine::{BuildOutcome, Engine};
    pub use crate::errors::{
        BuildError, ConfigurationError, CycleDetectedError, ExecutionError, ManifestError,
        StagesFailed,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{Executor, Plan, PlannedStage, RunReport, StageReport};
    pub use crate::freshness::{Freshness, StaleReason};
    pub use crate::graph::{Levels, StageGraph};
    pub use crate::hashing::{fingerprint, Fingerprint, HashError};
    pub use crate::manifest::{
        Manifest, ManifestHandle, ManifestStore, ManifestWriter, PathFingerprint, StageRecord,
    };
    pub use crate::pipeline::{load_pipeline, parse_pipeline, StageSpec};
    pub use crate::runner::{CommandInvocation, CommandOutput, CommandRunner, ShellCommandRunner};
    pub use crate::validate::{NonReproducible, ReproducibilityReport, Unverified};
}

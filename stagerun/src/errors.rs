//! Error types for the stagerun engine.
//!
//! Graph and configuration errors abort a run before any side effect.
//! Manifest errors abort the whole run because losing build state would
//! cause incorrect skips later. Stage-level execution errors never surface
//! here: they are recorded in the stage report instead.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The pipeline definition is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A cycle was detected in the stage graph.
    #[error("{0}")]
    Cycle(#[from] CycleDetectedError),

    /// The manifest could not be read or written.
    #[error("{0}")]
    Manifest(#[from] ManifestError),

    /// An internal task failed unexpectedly.
    #[error("Internal error: {0}")]
    Runtime(String),
}

impl BuildError {
    /// Returns the stable short name used in reports and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Cycle(_) => "graph",
            Self::Manifest(_) => "manifest",
            Self::Runtime(_) => "runtime",
        }
    }
}

/// Error raised when the pipeline definition is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Two stages share a name.
    #[must_use]
    pub fn duplicate_stage(name: &str) -> Self {
        Self::new(format!("Stage '{name}' is defined more than once"))
            .with_stages(vec![name.to_string()])
    }

    /// Two stages declare the same output path.
    #[must_use]
    pub fn duplicate_output(path: &str, first: &str, second: &str) -> Self {
        Self::new(format!(
            "Output '{path}' is produced by both '{first}' and '{second}'"
        ))
        .with_stages(vec![first.to_string(), second.to_string()])
    }

    /// A dependency path is neither produced by a stage nor present on disk.
    #[must_use]
    pub fn dangling_dependency(stage: &str, path: &str) -> Self {
        Self::new(format!(
            "Stage '{stage}' depends on '{path}', which no stage produces and which does not exist"
        ))
        .with_stages(vec![stage.to_string()])
    }

    /// A stage name referenced by a link or selection is unknown.
    #[must_use]
    pub fn unknown_stage(name: &str) -> Self {
        Self::new(format!("Stage '{name}' not found")).with_stages(vec![name.to_string()])
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circular dependency detected: {}", .cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Errors reading or writing the persisted manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// An I/O error occurred while reading or writing the manifest.
    #[error("manifest I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The manifest document could not be parsed.
    #[error("failed to parse manifest {path}: {reason}")]
    Parse {
        /// The manifest path.
        path: PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// The manifest declares a schema this engine does not understand.
    #[error("unsupported manifest schema '{found}' in {path}")]
    UnsupportedSchema {
        /// The manifest path.
        path: PathBuf,
        /// The schema string found in the document.
        found: String,
    },

    /// The manifest could not be serialized.
    #[error("failed to serialize manifest: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The writer stopped after an earlier failure.
    #[error("manifest writer is closed: {reason}")]
    WriterClosed {
        /// Why the writer stopped accepting updates.
        reason: String,
    },
}

/// Summary of a run that did not bring every stage up to date.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} stage(s) failed: {}{}", .failed.len(), .failed.join(", "), not_attempted_suffix(.not_attempted))]
pub struct StagesFailed {
    /// Stages that failed.
    pub failed: Vec<String>,
    /// Stages never started because the run stopped.
    pub not_attempted: Vec<String>,
}

fn not_attempted_suffix(not_attempted: &[String]) -> String {
    if not_attempted.is_empty() {
        String::new()
    } else {
        format!(" ({} not attempted)", not_attempted.len())
    }
}

/// Why a single stage could not be brought up to date.
///
/// These never abort the run on their own; the executor records them on the
/// stage report and stops submitting new work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The command could not be started.
    #[error("failed to launch command: {0}")]
    Launch(String),

    /// The command exited with a non-zero status, or was killed by a signal.
    #[error("command exited with {}", .exit_code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")))]
    NonZeroExit {
        /// The exit code, if the process exited normally.
        exit_code: Option<i32>,
    },

    /// A dependency that no stage produces is missing.
    #[error("missing required input: {0}")]
    MissingInput(String),

    /// A declared output does not exist after a successful command.
    #[error("declared output was not produced: {0}")]
    MissingOutput(String),

    /// A dependency or output could not be fingerprinted after the command ran.
    #[error("could not fingerprint {path}: {reason}")]
    Fingerprint {
        /// The path that failed.
        path: String,
        /// The hashing error.
        reason: String,
    },

    /// The stage record could not be handed to the manifest writer.
    #[error("could not record stage: {0}")]
    Record(String),

    /// The worker task itself failed.
    #[error("worker failed: {0}")]
    Worker(String),
}

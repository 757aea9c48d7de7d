//! Stage specifications.

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Specification for a single stage in a pipeline.
///
/// A stage is immutable once the graph is built. Its identity is its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The command text, passed opaquely to the command runner.
    pub cmd: String,
    /// Dependency paths, relative to the pipeline root.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Output paths, relative to the pipeline root.
    #[serde(default)]
    pub outs: Vec<String>,
    /// Names of stages this stage must run after, regardless of paths.
    #[serde(default)]
    pub after: Vec<String>,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            deps: Vec::new(),
            outs: Vec::new(),
            after: Vec::new(),
            desc: None,
        }
    }

    /// Sets the dependency paths.
    #[must_use]
    pub fn with_deps(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency path.
    #[must_use]
    pub fn with_dep(mut self, dep: impl Into<String>) -> Self {
        self.deps.push(dep.into());
        self
    }

    /// Sets the output paths.
    #[must_use]
    pub fn with_outs(mut self, outs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outs = outs.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an output path.
    #[must_use]
    pub fn with_out(mut self, out: impl Into<String>) -> Self {
        self.outs.push(out.into());
        self
    }

    /// Adds an explicit stage-to-stage link.
    #[must_use]
    pub fn with_after(mut self, stage: impl Into<String>) -> Self {
        self.after.push(stage.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Validates the stage specification on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or command is empty, or the stage
    /// lists itself in `after`.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::new("Stage name cannot be empty"));
        }
        if self.cmd.trim().is_empty() {
            return Err(ConfigurationError::new(format!(
                "Stage '{}' has an empty 'cmd'",
                self.name
            ))
            .with_stages(vec![self.name.clone()]));
        }
        if self.after.iter().any(|s| s == &self.name) {
            return Err(ConfigurationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()]));
        }
        Ok(())
    }
}

//! Engine configuration.
//!
//! Precedence, lowest first: built-in defaults, a deserialized document,
//! `STAGERUN_*` environment variables, then explicit `with_*` calls (the
//! CLI applies its flags last).

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Environment variable overriding [`EngineConfig::jobs`].
pub const ENV_JOBS: &str = "STAGERUN_JOBS";
/// Environment variable overriding [`EngineConfig::manifest_file`].
pub const ENV_MANIFEST: &str = "STAGERUN_MANIFEST";

/// Configuration for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pipeline root; stage commands run here and paths resolve against it.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Pipeline definition, relative to `root` unless absolute.
    #[serde(default = "default_pipeline_file")]
    pub pipeline_file: PathBuf,
    /// Manifest file, relative to `root` unless absolute.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: PathBuf,
    /// Maximum number of commands running at once.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Run every selected stage regardless of freshness. Read by
    /// [`Engine::run`](crate::engine::Engine::run) and `dry_run`.
    #[serde(default)]
    pub force: bool,
    /// Makes [`Engine::build`](crate::engine::Engine::build) report what
    /// would run without running anything.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_pipeline_file() -> PathBuf {
    PathBuf::from("dvc.yaml")
}

fn default_manifest_file() -> PathBuf {
    PathBuf::from("dvc.lock")
}

/// Host parallelism, or 1 if it cannot be determined.
#[must_use]
pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            pipeline_file: default_pipeline_file(),
            manifest_file: default_manifest_file(),
            jobs: default_jobs(),
            force: false,
            dry_run: false,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Sets the pipeline definition file.
    #[must_use]
    pub fn with_pipeline_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_file = path.into();
        self
    }

    /// Sets the manifest file.
    #[must_use]
    pub fn with_manifest_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_file = path.into();
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Enables or disables force mode.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Applies `STAGERUN_JOBS` and `STAGERUN_MANIFEST` from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `STAGERUN_JOBS` is not a positive integer.
    pub fn with_env_overrides(self) -> Result<Self, ConfigurationError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the jobs override is not a positive integer.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        if let Some(jobs) = lookup(ENV_JOBS) {
            self.jobs = jobs
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ConfigurationError::new(format!(
                        "{ENV_JOBS} must be a positive integer, got '{jobs}'"
                    ))
                })?;
        }
        if let Some(manifest) = lookup(ENV_MANIFEST).filter(|m| !m.is_empty()) {
            self.manifest_file = PathBuf::from(manifest);
        }
        Ok(self)
    }

    /// Checks the configuration for values the engine cannot use.
    ///
    /// # Errors
    ///
    /// Returns an error if `jobs` is zero.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.jobs == 0 {
            return Err(ConfigurationError::new("jobs must be at least 1"));
        }
        Ok(())
    }

    /// Returns the resolved pipeline definition path.
    #[must_use]
    pub fn pipeline_path(&self) -> PathBuf {
        self.root.join(&self.pipeline_file)
    }

    /// Returns the resolved manifest path.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new("/work");
        assert_eq!(config.pipeline_path(), PathBuf::from("/work/dvc.yaml"));
        assert_eq!(config.manifest_path(), PathBuf::from("/work/dvc.lock"));
        assert!(config.jobs >= 1);
        assert!(!config.force);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_absolute_files_ignore_root() {
        let config = EngineConfig::new("/work").with_manifest_file("/state/run.lock");
        assert_eq!(config.manifest_path(), PathBuf::from("/state/run.lock"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: EngineConfig = serde_yaml::from_str("root: /data\njobs: 3\n").unwrap();
        assert_eq!(config.root, PathBuf::from("/data"));
        assert_eq!(config.jobs, 3);
        assert_eq!(config.pipeline_file, PathBuf::from("dvc.yaml"));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::new(".")
            .with_overrides_from(env(&[(ENV_JOBS, "6"), (ENV_MANIFEST, "ci.lock")]))
            .unwrap();
        assert_eq!(config.jobs, 6);
        assert_eq!(config.manifest_file, PathBuf::from("ci.lock"));
    }

    #[test]
    fn test_invalid_jobs_override() {
        for bad in ["0", "-2", "many"] {
            let err = EngineConfig::new(".")
                .with_overrides_from(env(&[(ENV_JOBS, bad)]))
                .unwrap_err();
            assert!(err.message.contains(ENV_JOBS));
        }
    }

    #[test]
    fn test_zero_jobs_is_invalid() {
        assert!(EngineConfig::new(".").with_jobs(0).validate().is_err());
    }
}

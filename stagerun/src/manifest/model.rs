//! Manifest document model.

use crate::errors::ManifestError;
use crate::hashing::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version written into new manifests.
pub const SCHEMA_VERSION: &str = "2.0";

fn default_schema() -> String {
    SCHEMA_VERSION.to_string()
}

/// A recorded path with its content digest and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFingerprint {
    /// The path as declared in the pipeline definition.
    pub path: String,
    /// Lowercase hex MD5 of the file or directory listing.
    #[serde(default)]
    pub md5: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
}

impl PathFingerprint {
    /// Creates a fingerprint record for a declared path.
    #[must_use]
    pub fn new(path: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.into(),
            md5: fingerprint.md5,
            size: fingerprint.size,
        }
    }
}

/// The last successful build of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Command text the stage ran with.
    pub cmd: String,
    /// Dependency fingerprints observed after the command exited.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<PathFingerprint>,
    /// Output fingerprints observed after the command exited.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outs: Vec<PathFingerprint>,
}

impl StageRecord {
    /// Creates an empty record for a command.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            deps: Vec::new(),
            outs: Vec::new(),
        }
    }

    /// Returns the recorded dependency fingerprint for a path.
    #[must_use]
    pub fn dep(&self, path: &str) -> Option<&PathFingerprint> {
        self.deps.iter().find(|d| d.path == path)
    }

    /// Returns the recorded output fingerprint for a path.
    #[must_use]
    pub fn out(&self, path: &str) -> Option<&PathFingerprint> {
        self.outs.iter().find(|o| o.path == path)
    }
}

/// The persisted record of every stage's last successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Document schema version.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Stage name -> record.
    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Creates an empty manifest at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: default_schema(),
            stages: BTreeMap::new(),
        }
    }

    /// Returns the record for a stage.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.get(stage)
    }

    /// Replaces the record for a stage, returning the previous one.
    pub fn insert(&mut self, stage: impl Into<String>, record: StageRecord) -> Option<StageRecord> {
        self.stages.insert(stage.into(), record)
    }

    /// Returns true if the schema major version is understood.
    #[must_use]
    pub fn is_compatible(&self) -> bool {
        self.schema.split('.').next() == SCHEMA_VERSION.split('.').next()
    }

    /// Parses a manifest from YAML text.
    ///
    /// Empty text yields an empty manifest.
    ///
    /// # Errors
    ///
    /// Returns the parser's message if the document is malformed.
    pub fn from_yaml(text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_yaml::from_str(text).map_err(|e| e.to_string())
    }

    /// Serializes the full document to YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        serde_yaml::to_string(self).map_err(|e| ManifestError::Serialization {
            reason: e.to_string(),
        })
    }
}

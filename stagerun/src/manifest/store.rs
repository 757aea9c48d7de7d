//! Loading and atomically replacing the manifest file.

use super::Manifest;
use crate::errors::ManifestError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The on-disk location of a manifest.
///
/// Saving writes the full document to a temporary file in the same
/// directory, syncs it, then renames it over the canonical path. Readers see
/// either the previous document or the new one, never a partial write.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    /// Creates a store for a manifest path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the manifest path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the manifest, or an empty one if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, is malformed,
    /// or declares an unsupported schema.
    pub fn load(&self) -> Result<Manifest, ManifestError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No manifest yet, starting empty");
                return Ok(Manifest::new());
            }
            Err(source) => {
                return Err(ManifestError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let manifest = Manifest::from_yaml(&text).map_err(|reason| ManifestError::Parse {
            path: self.path.clone(),
            reason,
        })?;

        if !manifest.is_compatible() {
            return Err(ManifestError::UnsupportedSchema {
                path: self.path.clone(),
                found: manifest.schema,
            });
        }

        debug!(path = %self.path.display(), stages = manifest.stages.len(), "Loaded manifest");
        Ok(manifest)
    }

    /// Atomically replaces the manifest file with `manifest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized, written, synced
    /// or renamed. The previous file is left untouched in every case.
    pub fn save(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        let text = manifest.to_yaml()?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let io_err = |source| ManifestError::Io {
            path: self.path.clone(),
            source,
        };

        let prefix = format!(
            ".{}.",
            self.path
                .file_name()
                .map_or_else(|| "manifest".into(), |n| n.to_string_lossy())
        );
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(io_err)?;
        tmp.write_all(text.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        #[cfg(unix)]
        if let Ok(parent) = std::fs::File::open(dir) {
            // Make the rename itself durable.
            let _ = parent.sync_all();
        }

        debug!(path = %self.path.display(), bytes = text.len(), "Persisted manifest");
        Ok(())
    }
}

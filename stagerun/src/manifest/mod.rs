//! The persisted build manifest.
//!
//! This module provides:
//! - The manifest document model (`dvc.lock` layout)
//! - A store that loads and atomically replaces the manifest file
//! - A single-writer coordinator that serializes concurrent stage updates

mod model;
mod store;
mod writer;

pub use model::{Manifest, PathFingerprint, StageRecord, SCHEMA_VERSION};
pub use store::ManifestStore;
pub use writer::{ManifestHandle, ManifestWriter};

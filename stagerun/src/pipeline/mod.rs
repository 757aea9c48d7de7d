//! Pipeline definitions.
//!
//! This module provides:
//! - Stage specifications
//! - A loader for `dvc.yaml`-style pipeline documents

mod loader;
mod spec;

pub use loader::{load_pipeline, parse_pipeline};
pub use spec::StageSpec;

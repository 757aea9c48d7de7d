//! Reproducibility checks.
//!
//! Validation re-runs every selected stage and compares the fresh output
//! fingerprints with the ones recorded before. It neither explains nor rolls
//! back differences: the manifest keeps the second run's state.

use crate::core::StageStatus;
use crate::errors::BuildError;
use crate::executor::{Executor, RunReport};
use crate::graph::Levels;
use crate::manifest::{Manifest, ManifestStore, ManifestWriter};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// An output whose content changed between two runs of the same stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonReproducible {
    /// The stage that produced the output.
    pub stage: String,
    /// The declared output path.
    pub path: String,
    /// MD5 recorded before validation.
    pub before: String,
    /// MD5 observed after the forced re-run.
    pub after: String,
}

/// A stage or output that had no earlier record to compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unverified {
    /// The stage name.
    pub stage: String,
    /// The output path, or `None` if the whole stage had no record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Result of a reproducibility check.
#[derive(Debug, Clone, Serialize)]
pub struct ReproducibilityReport {
    /// Stages whose outputs were compared.
    pub checked: Vec<String>,
    /// Outputs that differ from their earlier record.
    pub non_reproducible: Vec<NonReproducible>,
    /// Stages and outputs with nothing to compare against.
    pub unverified: Vec<Unverified>,
    /// The forced re-run.
    pub run: RunReport,
}

impl ReproducibilityReport {
    /// Returns true if the re-run succeeded and every compared output matched.
    ///
    /// Unverified entries do not count against reproducibility.
    #[must_use]
    pub fn is_reproducible(&self) -> bool {
        self.run.is_success() && self.non_reproducible.is_empty()
    }
}

/// Force-runs `levels` and compares output fingerprints with the stored manifest.
///
/// The executor is switched to force mode. If the re-run fails, nothing is
/// compared and the report only carries the run.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded or written.
pub async fn validate(
    executor: Executor,
    levels: &Levels,
    store: &ManifestStore,
) -> Result<ReproducibilityReport, BuildError> {
    let executor = executor.with_force(true);
    let before = store.load()?;
    let writer = ManifestWriter::spawn(store.clone(), before.clone());

    let run = executor
        .run(levels, Arc::new(before.clone()), &writer.handle())
        .await;
    let closed = writer.flush_and_close().await;
    let run = run?;
    let after = closed?;

    if !run.is_success() {
        warn!("Forced re-run failed, nothing compared");
        return Ok(ReproducibilityReport {
            checked: Vec::new(),
            non_reproducible: Vec::new(),
            unverified: Vec::new(),
            run,
        });
    }

    let report = compare(&before, &after, &run);
    info!(
        checked = report.checked.len(),
        non_reproducible = report.non_reproducible.len(),
        unverified = report.unverified.len(),
        "Validation finished"
    );
    Ok(report)
}

fn compare(before: &Manifest, after: &Manifest, run: &RunReport) -> ReproducibilityReport {
    let mut checked = Vec::new();
    let mut non_reproducible = Vec::new();
    let mut unverified = Vec::new();

    let completed = run
        .stages
        .iter()
        .filter(|s| s.status == StageStatus::Completed);
    for stage in completed {
        let name = &stage.stage;
        let (Some(old), Some(new)) = (before.get(name), after.get(name)) else {
            unverified.push(Unverified {
                stage: name.clone(),
                path: None,
            });
            continue;
        };

        checked.push(name.clone());
        for out in &new.outs {
            match old.out(&out.path) {
                None => unverified.push(Unverified {
                    stage: name.clone(),
                    path: Some(out.path.clone()),
                }),
                Some(recorded) if recorded.md5 != out.md5 => {
                    warn!(stage = %name, path = %out.path, "Output is not reproducible");
                    non_reproducible.push(NonReproducible {
                        stage: name.clone(),
                        path: out.path.clone(),
                        before: recorded.md5.clone(),
                        after: out.md5.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    ReproducibilityReport {
        checked,
        non_reproducible,
        unverified,
        run: run.clone(),
    }
}

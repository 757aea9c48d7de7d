//! Run and plan reports.

use crate::core::StageStatus;
use crate::errors::StagesFailed;
use crate::graph::Levels;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Outcome of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// The stage name.
    pub stage: String,
    /// Index of the level the stage belongs to.
    pub level: usize,
    /// Final status.
    pub status: StageStatus,
    /// Why the stage ran, or why it was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Error message for failed stages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exit code of the command, if it ran to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured stderr and stdout of a failed command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    /// Wall time spent on the stage, including hashing.
    pub duration_ms: u64,
}

impl StageReport {
    /// Creates a report with the given status and no details.
    #[must_use]
    pub fn new(stage: impl Into<String>, level: usize, status: StageStatus) -> Self {
        Self {
            stage: stage.into(),
            level,
            status,
            reason: None,
            error: None,
            exit_code: None,
            diagnostics: None,
            duration_ms: 0,
        }
    }

    /// Creates a report for a stage that was never started.
    #[must_use]
    pub fn not_attempted(stage: impl Into<String>, level: usize) -> Self {
        Self::new(stage, level, StageStatus::NotAttempted)
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Sets the exit code.
    #[must_use]
    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Sets captured diagnostics, ignoring empty text.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        let diagnostics = diagnostics.into();
        self.diagnostics = (!diagnostics.is_empty()).then_some(diagnostics);
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Stage reports in level order, sorted by name within a level.
    pub stages: Vec<StageReport>,
}

impl RunReport {
    /// Returns the report for a stage.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Returns the status of a stage.
    #[must_use]
    pub fn status(&self, stage: &str) -> Option<StageStatus> {
        self.get(stage).map(|s| s.status)
    }

    /// Returns the names of stages with the given status.
    #[must_use]
    pub fn stages_with(&self, status: StageStatus) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.stage.clone())
            .collect()
    }

    /// Returns the number of stages whose command ran successfully.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.stages_with(StageStatus::Completed).len()
    }

    /// Returns the number of stages skipped as fresh.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.stages_with(StageStatus::Skipped).len()
    }

    /// Returns true if every stage completed or was skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.stages.iter().all(|s| s.status.is_success())
    }

    /// Returns the failed and not-attempted stages, if the run did not succeed.
    #[must_use]
    pub fn failure(&self) -> Option<StagesFailed> {
        if self.is_success() {
            return None;
        }
        Some(StagesFailed {
            failed: self.stages_with(StageStatus::Failed),
            not_attempted: self.stages_with(StageStatus::NotAttempted),
        })
    }

    /// Wall time of the run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Freshness of one stage in a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStage {
    /// The stage name.
    pub stage: String,
    /// Index of the level the stage belongs to.
    pub level: usize,
    /// True if the stage would run.
    pub will_run: bool,
    /// Human-readable freshness, e.g. "dependency changed: data.csv".
    pub reason: String,
}

/// The result of a dry run: levels plus per-stage freshness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// The execution levels.
    pub levels: Levels,
    /// Per-stage freshness in level order.
    pub stages: Vec<PlannedStage>,
}

impl Plan {
    /// Returns the names of stages that would run.
    #[must_use]
    pub fn to_run(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.will_run)
            .map(|s| s.stage.as_str())
            .collect()
    }

    /// Returns the planned entry for a stage.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&PlannedStage> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn report(stages: Vec<StageReport>) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            stages,
        }
    }

    #[test]
    fn test_successful_run() {
        let run = report(vec![
            StageReport::new("a", 0, StageStatus::Completed),
            StageReport::new("b", 0, StageStatus::Skipped).with_reason("up-to-date"),
        ]);
        assert!(run.is_success());
        assert!(run.failure().is_none());
        assert_eq!(run.completed_count(), 1);
        assert_eq!(run.skipped_count(), 1);
        assert_eq!(run.status("b"), Some(StageStatus::Skipped));
    }

    #[test]
    fn test_failed_run() {
        let run = report(vec![
            StageReport::new("a", 0, StageStatus::Failed).with_exit_code(Some(1)),
            StageReport::new("b", 0, StageStatus::Completed),
            StageReport::not_attempted("c", 1),
        ]);
        assert!(!run.is_success());
        assert_eq!(
            run.failure(),
            Some(StagesFailed {
                failed: vec!["a".into()],
                not_attempted: vec!["c".into()],
            })
        );
    }

    #[test]
    fn test_empty_diagnostics_are_dropped() {
        let report = StageReport::new("a", 0, StageStatus::Failed).with_diagnostics("");
        assert_eq!(report.diagnostics, None);
    }

    #[test]
    fn test_report_serializes_status_in_snake_case() {
        let json = serde_json::to_value(StageReport::not_attempted("c", 2)).unwrap();
        assert_eq!(json["status"], "not_attempted");
        assert!(json.get("error").is_none());
    }
}

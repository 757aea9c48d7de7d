//! Stage status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of a stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage was up to date and did not run.
    Skipped,
    /// Stage ran successfully and its record was handed to the manifest writer.
    Completed,
    /// Stage command failed or could not be started.
    Failed,
    /// Stage was never started because an earlier failure stopped submissions.
    NotAttempted,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::NotAttempted => write!(f, "not attempted"),
        }
    }
}

impl StageStatus {
    /// Returns true if the stage ended up current.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Completed)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Skipped.to_string(), "skipped");
        assert_eq!(StageStatus::Failed.to_string(), "failed");
        assert_eq!(StageStatus::NotAttempted.to_string(), "not attempted");
    }

    #[test]
    fn test_stage_status_success() {
        assert!(StageStatus::Skipped.is_success());
        assert!(StageStatus::Completed.is_success());
        assert!(StageStatus::Failed.is_failure());
        assert!(!StageStatus::NotAttempted.is_success());
        assert!(!StageStatus::NotAttempted.is_failure());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::NotAttempted).unwrap();
        assert_eq!(json, r#""not_attempted""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::NotAttempted);
    }
}

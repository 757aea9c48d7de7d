//! Skip-or-run decisions from recorded fingerprints.
//!
//! A stage is fresh when its last recorded build used the same command and
//! every declared dependency and output still hashes to the recorded MD5.
//! Any read failure makes the stage stale rather than failing the run.

use crate::hashing::{self, HashError};
use crate::manifest::{PathFingerprint, StageRecord};
use crate::pipeline::StageSpec;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Why a stage has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The stage has no record.
    NeverRun,
    /// The recorded command differs from the declared one.
    CommandChanged,
    /// A declared dependency has no recorded fingerprint.
    NewDependency(String),
    /// A declared dependency does not exist.
    MissingDependency(String),
    /// A dependency's content differs from the record.
    DependencyChanged(String),
    /// A dependency exists but could not be hashed.
    UnreadableDependency(String),
    /// A declared output has no recorded fingerprint.
    NewOutput(String),
    /// A declared output does not exist.
    MissingOutput(String),
    /// An output's content differs from the record.
    OutputChanged(String),
    /// An output exists but could not be hashed.
    UnreadableOutput(String),
    /// The record holds dependencies the stage no longer declares.
    DependencySetChanged,
    /// Evaluation was bypassed.
    Forced,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverRun => write!(f, "never run before"),
            Self::CommandChanged => write!(f, "command changed"),
            Self::NewDependency(p) => write!(f, "new dependency: {p}"),
            Self::MissingDependency(p) => write!(f, "missing dependency: {p}"),
            Self::DependencyChanged(p) => write!(f, "dependency changed: {p}"),
            Self::UnreadableDependency(p) => write!(f, "error reading dependency: {p}"),
            Self::NewOutput(p) => write!(f, "new output: {p}"),
            Self::MissingOutput(p) => write!(f, "missing output: {p}"),
            Self::OutputChanged(p) => write!(f, "output changed: {p}"),
            Self::UnreadableOutput(p) => write!(f, "error reading output: {p}"),
            Self::DependencySetChanged => write!(f, "dependencies removed"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

/// Outcome of a freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Recorded state matches the workspace.
    Fresh,
    /// The stage must run.
    Stale(StaleReason),
}

impl Freshness {
    /// Returns true if the stage can be skipped.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    /// Returns the stale reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&StaleReason> {
        match self {
            Self::Fresh => None,
            Self::Stale(reason) => Some(reason),
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "up-to-date"),
            Self::Stale(reason) => reason.fmt(f),
        }
    }
}

#[derive(Clone, Copy)]
enum Side {
    Dependency,
    Output,
}

impl Side {
    fn unrecorded(self, path: &str) -> StaleReason {
        match self {
            Self::Dependency => StaleReason::NewDependency(path.to_string()),
            Self::Output => StaleReason::NewOutput(path.to_string()),
        }
    }

    fn missing(self, path: &str) -> StaleReason {
        match self {
            Self::Dependency => StaleReason::MissingDependency(path.to_string()),
            Self::Output => StaleReason::MissingOutput(path.to_string()),
        }
    }

    fn changed(self, path: &str) -> StaleReason {
        match self {
            Self::Dependency => StaleReason::DependencyChanged(path.to_string()),
            Self::Output => StaleReason::OutputChanged(path.to_string()),
        }
    }

    fn unreadable(self, path: &str) -> StaleReason {
        match self {
            Self::Dependency => StaleReason::UnreadableDependency(path.to_string()),
            Self::Output => StaleReason::UnreadableOutput(path.to_string()),
        }
    }
}

/// Decides whether `stage` must run, given its last record.
///
/// Declared paths are resolved against `root`. Performs blocking file I/O.
#[must_use]
pub fn evaluate(root: &Path, stage: &StageSpec, prior: Option<&StageRecord>) -> Freshness {
    let Some(record) = prior else {
        return Freshness::Stale(StaleReason::NeverRun);
    };

    if stage.cmd != record.cmd {
        return Freshness::Stale(StaleReason::CommandChanged);
    }

    for dep in &stage.deps {
        if let Some(reason) = check_path(root, dep, record.dep(dep), Side::Dependency) {
            return Freshness::Stale(reason);
        }
    }

    for out in &stage.outs {
        if let Some(reason) = check_path(root, out, record.out(out), Side::Output) {
            return Freshness::Stale(reason);
        }
    }

    if record.deps.iter().any(|d| !stage.deps.contains(&d.path)) {
        return Freshness::Stale(StaleReason::DependencySetChanged);
    }

    Freshness::Fresh
}

/// Returns true if `stage` can be skipped.
#[must_use]
pub fn is_fresh(root: &Path, stage: &StageSpec, prior: Option<&StageRecord>) -> bool {
    evaluate(root, stage, prior).is_fresh()
}

fn check_path(
    root: &Path,
    path: &str,
    recorded: Option<&PathFingerprint>,
    side: Side,
) -> Option<StaleReason> {
    let Some(recorded) = recorded else {
        return Some(side.unrecorded(path));
    };

    match hashing::fingerprint(&root.join(path)) {
        Ok(current) if current.md5 == recorded.md5 => None,
        Ok(_) => Some(side.changed(path)),
        Err(HashError::NotFound(_)) => Some(side.missing(path)),
        Err(e) => {
            warn!(path = %path, error = %e, "Could not hash path, treating stage as stale");
            Some(side.unreadable(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::fingerprint;
    use pretty_assertions::assert_eq;
    use std::fs;

    struct Workspace {
        dir: tempfile::TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn write(&self, rel: &str, contents: &str) {
            let path = self.root().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        fn record(&self, stage: &StageSpec) -> StageRecord {
            let fp = |p: &String| PathFingerprint::new(p.clone(), fingerprint(&self.root().join(p)).unwrap());
            StageRecord {
                cmd: stage.cmd.clone(),
                deps: stage.deps.iter().map(fp).collect(),
                outs: stage.outs.iter().map(fp).collect(),
            }
        }
    }

    fn stage() -> StageSpec {
        StageSpec::new("train", "python train.py")
            .with_dep("data.csv")
            .with_out("model.pkl")
    }

    fn built() -> (Workspace, StageRecord) {
        let ws = Workspace::new();
        ws.write("data.csv", "a,b\n1,2\n");
        ws.write("model.pkl", "weights");
        let record = ws.record(&stage());
        (ws, record)
    }

    #[test]
    fn test_never_run() {
        let ws = Workspace::new();
        let result = evaluate(ws.root(), &stage(), None);
        assert_eq!(result, Freshness::Stale(StaleReason::NeverRun));
        assert_eq!(result.to_string(), "never run before");
    }

    #[test]
    fn test_all_match_is_fresh() {
        let (ws, record) = built();
        assert_eq!(evaluate(ws.root(), &stage(), Some(&record)), Freshness::Fresh);
        assert!(is_fresh(ws.root(), &stage(), Some(&record)));
    }

    #[test]
    fn test_command_changed() {
        let (ws, record) = built();
        let changed = StageSpec {
            cmd: "python train.py --epochs 2".into(),
            ..stage()
        };
        assert_eq!(
            evaluate(ws.root(), &changed, Some(&record)),
            Freshness::Stale(StaleReason::CommandChanged)
        );
    }

    #[test]
    fn test_dependency_changed() {
        let (ws, record) = built();
        ws.write("data.csv", "a,b\n1,3\n");
        let result = evaluate(ws.root(), &stage(), Some(&record));
        assert_eq!(result.to_string(), "dependency changed: data.csv");
    }

    #[test]
    fn test_touch_without_change_stays_fresh() {
        let (ws, record) = built();
        ws.write("data.csv", "a,b\n1,2\n");
        assert!(is_fresh(ws.root(), &stage(), Some(&record)));
    }

    #[test]
    fn test_new_dependency() {
        let (ws, record) = built();
        ws.write("extra.csv", "x");
        let extended = stage().with_dep("extra.csv");
        assert_eq!(
            evaluate(ws.root(), &extended, Some(&record)),
            Freshness::Stale(StaleReason::NewDependency("extra.csv".into()))
        );
    }

    #[test]
    fn test_missing_dependency() {
        let (ws, record) = built();
        fs::remove_file(ws.root().join("data.csv")).unwrap();
        assert_eq!(
            evaluate(ws.root(), &stage(), Some(&record)).to_string(),
            "missing dependency: data.csv"
        );
    }

    #[test]
    fn test_output_missing() {
        let (ws, record) = built();
        fs::remove_file(ws.root().join("model.pkl")).unwrap();
        assert_eq!(
            evaluate(ws.root(), &stage(), Some(&record)),
            Freshness::Stale(StaleReason::MissingOutput("model.pkl".into()))
        );
    }

    #[test]
    fn test_output_changed() {
        let (ws, record) = built();
        ws.write("model.pkl", "tampered");
        assert_eq!(
            evaluate(ws.root(), &stage(), Some(&record)).to_string(),
            "output changed: model.pkl"
        );
    }

    #[test]
    fn test_dependencies_checked_before_outputs() {
        let (ws, record) = built();
        ws.write("data.csv", "changed");
        fs::remove_file(ws.root().join("model.pkl")).unwrap();
        assert_eq!(
            evaluate(ws.root(), &stage(), Some(&record)),
            Freshness::Stale(StaleReason::DependencyChanged("data.csv".into()))
        );
    }

    #[test]
    fn test_removed_dependency() {
        let (ws, mut record) = built();
        ws.write("old.csv", "x");
        record.deps.push(PathFingerprint::new(
            "old.csv",
            fingerprint(&ws.root().join("old.csv")).unwrap(),
        ));
        let result = evaluate(ws.root(), &stage(), Some(&record));
        assert_eq!(result, Freshness::Stale(StaleReason::DependencySetChanged));
        assert_eq!(result.to_string(), "dependencies removed");
    }

    #[test]
    fn test_directory_output() {
        let ws = Workspace::new();
        ws.write("data.csv", "1");
        ws.write("features/a.npy", "aa");
        ws.write("features/b.npy", "bb");
        let spec = StageSpec::new("featurize", "make features")
            .with_dep("data.csv")
            .with_out("features");
        let record = ws.record(&spec);
        assert!(is_fresh(ws.root(), &spec, Some(&record)));

        ws.write("features/c.npy", "cc");
        assert_eq!(
            evaluate(ws.root(), &spec, Some(&record)),
            Freshness::Stale(StaleReason::OutputChanged("features".into()))
        );
    }

    #[test]
    fn test_size_is_not_compared() {
        let (ws, mut record) = built();
        record.deps[0].size += 100;
        assert!(is_fresh(ws.root(), &stage(), Some(&record)));
    }
}

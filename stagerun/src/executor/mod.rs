//! Level-by-level stage execution with a bounded worker pool.
//!
//! Levels run strictly in order. Within a level every stage is spawned at
//! once and waits on a shared semaphore, so at most `concurrency` stages do
//! work at a time. The next level starts only after the current one has
//! fully drained.
//!
//! The first failure stops new work: stages that have not acquired a permit
//! yet, and every stage of later levels, end up `NotAttempted`. Commands
//! already running are left to finish.

mod report;

pub use report::{Plan, PlannedStage, RunReport, StageReport};

use crate::config::default_jobs;
use crate::core::StageStatus;
use crate::errors::{BuildError, ExecutionError};
use crate::events::{
    EventSink, NoOpEventSink, LEVEL_STARTED, RUN_COMPLETED, STAGE_COMPLETED, STAGE_FAILED,
    STAGE_NOT_ATTEMPTED, STAGE_SKIPPED, STAGE_STARTED,
};
use crate::freshness::{self, Freshness, StaleReason};
use crate::graph::{Levels, StageGraph};
use crate::hashing::{self, HashError};
use crate::manifest::{Manifest, ManifestHandle, PathFingerprint, StageRecord};
use crate::pipeline::StageSpec;
use crate::runner::{CommandInvocation, CommandRunner};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Runs stages of a graph level by level.
pub struct Executor {
    graph: Arc<StageGraph>,
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    events: Arc<dyn EventSink>,
    concurrency: usize,
    force: bool,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("root", &self.root)
            .field("stages", &self.graph.stage_count())
            .field("concurrency", &self.concurrency)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor for `graph`, running commands in `root`.
    #[must_use]
    pub fn new(
        graph: Arc<StageGraph>,
        root: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            graph,
            root: root.into(),
            runner,
            events: Arc::new(NoOpEventSink),
            concurrency: default_jobs(),
            force: false,
        }
    }

    /// Sets the maximum number of stages working at once. Zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Treats every stage as stale.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Returns the concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Evaluates freshness for every stage without running anything.
    ///
    /// # Errors
    ///
    /// Returns an error if `levels` names a stage the graph does not hold or
    /// the blocking evaluation task fails.
    pub async fn plan(&self, levels: &Levels, snapshot: Arc<Manifest>) -> Result<Plan, BuildError> {
        let graph = Arc::clone(&self.graph);
        let root = self.root.clone();
        let force = self.force;
        let planned_levels = levels.clone();

        let stages = tokio::task::spawn_blocking(move || {
            let mut stages = Vec::with_capacity(planned_levels.stage_count());
            for (level, names) in planned_levels.iter().enumerate() {
                for name in names {
                    let spec = lookup(&graph, name)?;
                    let freshness = if force {
                        Freshness::Stale(StaleReason::Forced)
                    } else {
                        freshness::evaluate(&root, spec, snapshot.get(name))
                    };
                    stages.push(PlannedStage {
                        stage: name.clone(),
                        level,
                        will_run: !freshness.is_fresh(),
                        reason: freshness.to_string(),
                    });
                }
            }
            Ok::<_, BuildError>(stages)
        })
        .await
        .map_err(|e| BuildError::Runtime(format!("planning task failed: {e}")))??;

        Ok(Plan {
            levels: levels.clone(),
            stages,
        })
    }

    /// Runs every stage in `levels`.
    ///
    /// `snapshot` is the manifest as loaded before the run and is used for
    /// freshness decisions; records of completed stages go to `writer`.
    /// Stage failures are reported in the returned [`RunReport`], not as
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns an error if `levels` names a stage the graph does not hold.
    pub async fn run(
        &self,
        levels: &Levels,
        snapshot: Arc<Manifest>,
        writer: &ManifestHandle,
    ) -> Result<RunReport, BuildError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);
        self.run_levels(run_id, levels, snapshot, writer)
            .instrument(span)
            .await
    }

    async fn run_levels(
        &self,
        run_id: Uuid,
        levels: &Levels,
        snapshot: Arc<Manifest>,
        writer: &ManifestHandle,
    ) -> Result<RunReport, BuildError> {
        let started_at = Utc::now();
        let shared = Arc::new(RunShared {
            root: self.root.clone(),
            graph: Arc::clone(&self.graph),
            runner: Arc::clone(&self.runner),
            events: Arc::clone(&self.events),
            snapshot,
            writer: writer.clone(),
            permits: Semaphore::new(self.concurrency),
            stop: AtomicBool::new(false),
            force: self.force,
        });

        info!(
            levels = levels.len(),
            stages = levels.stage_count(),
            concurrency = self.concurrency,
            force = self.force,
            "Starting run"
        );

        let mut reports = Vec::with_capacity(levels.stage_count());
        for (index, names) in levels.iter().enumerate() {
            if shared.should_stop() {
                reports.extend(names.iter().map(|name| shared.not_attempted(name, index)));
                continue;
            }

            info!(level = index, stages = names.len(), "Starting level");
            shared
                .events
                .try_emit(LEVEL_STARTED, Some(json!({"level": index, "stages": names})));

            let mut tasks = FuturesUnordered::new();
            for name in names {
                let spec = lookup(&self.graph, name)?.clone();
                let task_shared = Arc::clone(&shared);
                let span = info_span!("stage", stage = %name);
                let handle = tokio::spawn(run_stage(task_shared, spec, index).instrument(span));
                let name = name.clone();
                tasks.push(async move { (name, handle.await) });
            }

            let mut level_reports = Vec::with_capacity(names.len());
            while let Some((name, joined)) = tasks.next().await {
                let report = joined.unwrap_or_else(|e| {
                    let failure = StageFailure::from(ExecutionError::Worker(e.to_string()));
                    shared.failed(&name, index, &failure, 0)
                });
                level_reports.push(report);
            }
            level_reports.sort_by(|a, b| a.stage.cmp(&b.stage));
            reports.extend(level_reports);
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            stages: reports,
        };

        info!(
            completed = report.completed_count(),
            skipped = report.skipped_count(),
            failed = report.stages_with(StageStatus::Failed).len(),
            not_attempted = report.stages_with(StageStatus::NotAttempted).len(),
            duration_ms = report.duration_ms(),
            "Run finished"
        );
        shared.events.try_emit(
            RUN_COMPLETED,
            Some(json!({
                "run_id": run_id.to_string(),
                "success": report.is_success(),
                "completed": report.completed_count(),
                "skipped": report.skipped_count(),
                "duration_ms": report.duration_ms(),
            })),
        );

        Ok(report)
    }
}

fn lookup<'a>(graph: &'a StageGraph, name: &str) -> Result<&'a StageSpec, BuildError> {
    graph
        .stage(name)
        .ok_or_else(|| BuildError::Runtime(format!("stage '{name}' is not part of the graph")))
}

/// State shared by every stage task of one run.
struct RunShared {
    root: PathBuf,
    graph: Arc<StageGraph>,
    runner: Arc<dyn CommandRunner>,
    events: Arc<dyn EventSink>,
    snapshot: Arc<Manifest>,
    writer: ManifestHandle,
    permits: Semaphore,
    stop: AtomicBool,
    force: bool,
}

/// A stage failure with whatever the command reported.
struct StageFailure {
    error: ExecutionError,
    exit_code: Option<i32>,
    diagnostics: String,
}

impl From<ExecutionError> for StageFailure {
    fn from(error: ExecutionError) -> Self {
        Self {
            error,
            exit_code: None,
            diagnostics: String::new(),
        }
    }
}

impl RunShared {
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.writer.is_poisoned()
    }

    fn not_attempted(&self, stage: &str, level: usize) -> StageReport {
        debug!(stage = %stage, level, "Stage not attempted");
        self.events
            .try_emit(STAGE_NOT_ATTEMPTED, Some(json!({"stage": stage, "level": level})));
        StageReport::not_attempted(stage, level)
    }

    fn failed(
        &self,
        stage: &str,
        level: usize,
        failure: &StageFailure,
        duration_ms: u64,
    ) -> StageReport {
        self.stop.store(true, Ordering::SeqCst);
        warn!(
            stage = %stage,
            error = %failure.error,
            exit_code = ?failure.exit_code,
            "Stage failed"
        );
        self.events.try_emit(
            STAGE_FAILED,
            Some(json!({
                "stage": stage,
                "error": failure.error.to_string(),
                "exit_code": failure.exit_code,
                "duration_ms": duration_ms,
            })),
        );
        StageReport::new(stage, level, StageStatus::Failed)
            .with_error(failure.error.to_string())
            .with_exit_code(failure.exit_code)
            .with_diagnostics(failure.diagnostics.clone())
            .with_duration_ms(duration_ms)
    }

    async fn freshness(&self, spec: &StageSpec) -> Result<Freshness, ExecutionError> {
        if self.force {
            return Ok(Freshness::Stale(StaleReason::Forced));
        }
        let root = self.root.clone();
        let spec = spec.clone();
        let snapshot = Arc::clone(&self.snapshot);
        tokio::task::spawn_blocking(move || {
            freshness::evaluate(&root, &spec, snapshot.get(&spec.name))
        })
        .await
        .map_err(|e| ExecutionError::Worker(format!("freshness check failed: {e}")))
    }

    /// Runs the command, fingerprints the result and submits the record.
    async fn execute(&self, spec: &StageSpec) -> Result<(), StageFailure> {
        for dep in self.graph.static_inputs(&spec.name) {
            if !tokio::fs::try_exists(self.root.join(dep)).await.unwrap_or(false) {
                return Err(ExecutionError::MissingInput(dep.clone()).into());
            }
        }

        let invocation = CommandInvocation::new(&spec.name, &spec.cmd, &self.root);
        let output = self.runner.run(&invocation).await?;
        if !output.is_success() {
            return Err(StageFailure {
                error: ExecutionError::NonZeroExit {
                    exit_code: output.exit_code,
                },
                exit_code: output.exit_code,
                diagnostics: output.diagnostics(),
            });
        }

        let root = self.root.clone();
        let owned = spec.clone();
        let record = tokio::task::spawn_blocking(move || fingerprint_record(&root, &owned))
            .await
            .map_err(|e| ExecutionError::Worker(format!("fingerprint task failed: {e}")))??;

        self.writer
            .submit(&spec.name, record)
            .map_err(|e| ExecutionError::Record(e.to_string()))?;
        Ok(())
    }
}

async fn run_stage(shared: Arc<RunShared>, spec: StageSpec, level: usize) -> StageReport {
    let Ok(_permit) = shared.permits.acquire().await else {
        return shared.not_attempted(&spec.name, level);
    };
    if shared.should_stop() {
        return shared.not_attempted(&spec.name, level);
    }

    let started = Instant::now();
    let elapsed = || u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let freshness = match shared.freshness(&spec).await {
        Ok(freshness) => freshness,
        Err(e) => return shared.failed(&spec.name, level, &StageFailure::from(e), elapsed()),
    };

    if freshness.is_fresh() {
        info!(stage = %spec.name, "Stage up to date, skipping");
        shared
            .events
            .try_emit(STAGE_SKIPPED, Some(json!({"stage": spec.name, "level": level})));
        return StageReport::new(&spec.name, level, StageStatus::Skipped)
            .with_reason(freshness.to_string())
            .with_duration_ms(elapsed());
    }

    // Another stage may have failed while this one was being evaluated.
    if shared.should_stop() {
        return shared.not_attempted(&spec.name, level);
    }

    let reason = freshness.to_string();
    info!(stage = %spec.name, reason = %reason, "Running stage");
    shared.events.try_emit(
        STAGE_STARTED,
        Some(json!({"stage": spec.name, "level": level, "reason": reason})),
    );

    match shared.execute(&spec).await {
        Ok(()) => {
            let duration_ms = elapsed();
            info!(stage = %spec.name, duration_ms, "Stage completed");
            shared.events.try_emit(
                STAGE_COMPLETED,
                Some(json!({"stage": spec.name, "level": level, "duration_ms": duration_ms})),
            );
            StageReport::new(&spec.name, level, StageStatus::Completed)
                .with_reason(reason)
                .with_duration_ms(duration_ms)
        }
        Err(failure) => shared
            .failed(&spec.name, level, &failure, elapsed())
            .with_reason(reason),
    }
}

/// Fingerprints every declared dependency and output of a stage that just ran.
fn fingerprint_record(root: &Path, spec: &StageSpec) -> Result<StageRecord, ExecutionError> {
    let mut record = StageRecord::new(&spec.cmd);

    for dep in &spec.deps {
        let fp = hashing::fingerprint(&root.join(dep)).map_err(|e| ExecutionError::Fingerprint {
            path: dep.clone(),
            reason: e.to_string(),
        })?;
        record.deps.push(PathFingerprint::new(dep, fp));
    }

    for out in &spec.outs {
        let fp = match hashing::fingerprint(&root.join(out)) {
            Ok(fp) => fp,
            Err(HashError::NotFound(_)) => return Err(ExecutionError::MissingOutput(out.clone())),
            Err(e) => {
                return Err(ExecutionError::Fingerprint {
                    path: out.clone(),
                    reason: e.to_string(),
                })
            }
        };
        record.outs.push(PathFingerprint::new(out, fp));
    }

    debug!(
        stage = %spec.name,
        deps = record.deps.len(),
        outs = record.outs.len(),
        "Fingerprinted stage"
    );
    Ok(record)
}

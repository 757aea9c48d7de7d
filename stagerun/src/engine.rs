//! The engine facade: load a pipeline once, then plan, run or validate it.

use crate::config::EngineConfig;
use crate::errors::BuildError;
use crate::events::{EventSink, NoOpEventSink};
use crate::executor::{Executor, Plan, RunReport};
use crate::graph::{Levels, StageGraph};
use crate::manifest::{ManifestStore, ManifestWriter};
use crate::pipeline::{load_pipeline, StageSpec};
use crate::runner::{CommandRunner, ShellCommandRunner};
use crate::validate::{self, ReproducibilityReport};
use std::sync::Arc;
use tracing::{debug, info};

/// What [`Engine::build`] did, depending on [`EngineConfig::dry_run`].
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// Dry run: the stages that would run, nothing executed.
    Planned(Plan),
    /// The stages were brought up to date.
    Ran(RunReport),
}

/// Entry point for building a pipeline.
///
/// Every operation takes a stage selection. An empty selection means the
/// whole pipeline; otherwise the named stages plus everything they depend on.
/// A `force` argument adds to [`EngineConfig::force`]; it cannot turn it off.
pub struct Engine {
    config: EngineConfig,
    graph: StageGraph,
    runner: Arc<dyn CommandRunner>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("stages", &self.graph.stage_count())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Loads the pipeline definition named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or the definition
    /// cannot be read or does not form a valid graph.
    pub fn from_config(config: EngineConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let stages = load_pipeline(&config.pipeline_path())?;
        Self::new(config, stages)
    }

    /// Creates an engine from stage specifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the stages do not form a valid graph.
    pub fn new(config: EngineConfig, stages: Vec<StageSpec>) -> Result<Self, BuildError> {
        config.validate()?;
        let graph = StageGraph::build(stages)?;
        debug!(stages = graph.stage_count(), root = %config.root.display(), "Engine ready");
        Ok(Self {
            config,
            graph,
            runner: Arc::new(ShellCommandRunner::new()),
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Replaces the command runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the graph restricted to `selection`.
    ///
    /// # Errors
    ///
    /// Returns an error if a selected stage does not exist.
    pub fn graph(&self, selection: &[String]) -> Result<StageGraph, BuildError> {
        if selection.is_empty() {
            return Ok(self.graph.clone());
        }
        Ok(self.graph.select(selection)?)
    }

    /// Computes the execution levels for `selection`.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown stage or a dependency cycle.
    pub fn plan(&self, selection: &[String]) -> Result<Levels, BuildError> {
        Ok(self.graph(selection)?.levels()?)
    }

    /// Reports which stages would run, without running or writing anything.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid selection or graph, a dangling
    /// dependency, or an unreadable manifest.
    pub async fn dry_run(&self, selection: &[String], force: bool) -> Result<Plan, BuildError> {
        let (graph, levels) = self.prepare(selection)?;
        let snapshot = self.store().load()?;
        self.executor(graph)
            .with_force(force || self.config.force)
            .plan(&levels, Arc::new(snapshot))
            .await
    }

    /// Brings the selected stages up to date.
    ///
    /// Stage failures are reported in the returned [`RunReport`]. All
    /// records of completed stages are on disk when this returns.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid selection or graph, a dangling
    /// dependency, or when the manifest cannot be read or written.
    pub async fn run(&self, selection: &[String], force: bool) -> Result<RunReport, BuildError> {
        let (graph, levels) = self.prepare(selection)?;
        let store = self.store();
        let snapshot = store.load()?;
        let writer = ManifestWriter::spawn(store, snapshot.clone());

        let report = self
            .executor(graph)
            .with_force(force || self.config.force)
            .run(&levels, Arc::new(snapshot), &writer.handle())
            .await;
        let closed = writer.flush_and_close().await;

        let report = report?;
        closed?;
        info!(success = report.is_success(), "Run complete");
        Ok(report)
    }

    /// Runs or dry-runs the selection as the configuration says.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::run`] and [`Engine::dry_run`].
    pub async fn build(&self, selection: &[String]) -> Result<BuildOutcome, BuildError> {
        if self.config.dry_run {
            Ok(BuildOutcome::Planned(self.dry_run(selection, false).await?))
        } else {
            Ok(BuildOutcome::Ran(self.run(selection, false).await?))
        }
    }

    /// Re-runs the selected stages and checks that outputs are unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid selection or graph, a dangling
    /// dependency, or when the manifest cannot be read or written.
    pub async fn validate(&self, selection: &[String]) -> Result<ReproducibilityReport, BuildError> {
        let (graph, levels) = self.prepare(selection)?;
        validate::validate(self.executor(graph), &levels, &self.store()).await
    }

    fn prepare(&self, selection: &[String]) -> Result<(Arc<StageGraph>, Levels), BuildError> {
        let graph = self.graph(selection)?;
        let levels = graph.levels()?;
        graph.check_static_inputs(&self.config.root)?;
        Ok((Arc::new(graph), levels))
    }

    fn executor(&self, graph: Arc<StageGraph>) -> Executor {
        Executor::new(graph, self.config.root.clone(), Arc::clone(&self.runner))
            .with_concurrency(self.config.jobs)
            .with_event_sink(Arc::clone(&self.events))
    }

    fn store(&self) -> ManifestStore {
        ManifestStore::new(self.config.manifest_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use crate::testing::{ScriptedRunner, TestWorkspace};
    use pretty_assertions::assert_eq;

    fn stages() -> Vec<StageSpec> {
        vec![
            StageSpec::new("a", "make a").with_dep("src.txt").with_out("a.txt"),
            StageSpec::new("b", "make b").with_dep("a.txt").with_out("b.txt"),
            StageSpec::new("other", "make other").with_out("other.txt"),
        ]
    }

    fn engine(ws: &TestWorkspace, runner: Arc<ScriptedRunner>) -> Engine {
        engine_with(EngineConfig::new(ws.root()), runner)
    }

    fn engine_with(config: EngineConfig, runner: Arc<ScriptedRunner>) -> Engine {
        Engine::new(config.with_jobs(2), stages())
            .unwrap()
            .with_runner(runner)
    }

    fn runner() -> Arc<ScriptedRunner> {
        Arc::new(
            ScriptedRunner::new()
                .writes("a", "a.txt", "A")
                .writes("b", "b.txt", "B")
                .writes("other", "other.txt", "O"),
        )
    }

    #[test]
    fn test_plan_levels() {
        let ws = TestWorkspace::new();
        let engine = engine(&ws, runner());
        let levels = engine.plan(&[]).unwrap();
        assert_eq!(
            levels.as_slice(),
            &[
                vec!["a".to_string(), "other".to_string()],
                vec!["b".to_string()]
            ]
        );
        assert_eq!(engine.plan(&["b".to_string()]).unwrap().stage_count(), 2);
    }

    #[test]
    fn test_unknown_selection() {
        let ws = TestWorkspace::new();
        let err = engine(&ws, runner()).plan(&["nope".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[tokio::test]
    async fn test_dangling_dependency_aborts_before_running() {
        let ws = TestWorkspace::new();
        let runner = runner();
        let err = engine(&ws, runner.clone()).run(&[], false).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("src.txt"));
        assert!(runner.calls().is_empty());
        assert!(!ws.exists("dvc.lock"));
    }

    #[tokio::test]
    async fn test_selected_run_leaves_other_stages_alone() {
        let ws = TestWorkspace::new();
        ws.write("src.txt", "source");
        let runner = runner();
        let engine = engine(&ws, runner.clone());

        let report = engine.run(&["b".to_string()], false).await.unwrap();
        assert!(report.is_success());
        assert_eq!(runner.called_stages(), vec!["a", "b"]);
        assert!(report.get("other").is_none());
        assert!(!ws.exists("other.txt"));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let ws = TestWorkspace::new();
        ws.write("src.txt", "source");
        let runner = runner();
        let engine = engine(&ws, runner.clone());

        let plan = engine.dry_run(&[], false).await.unwrap();
        assert_eq!(plan.to_run().len(), 3);
        assert!(runner.calls().is_empty());
        assert!(!ws.exists("dvc.lock"));

        engine.run(&[], false).await.unwrap();
        let plan = engine.dry_run(&[], false).await.unwrap();
        assert!(plan.to_run().is_empty());
        assert_eq!(plan.get("b").unwrap().reason, "up-to-date");

        let forced = engine.dry_run(&[], true).await.unwrap();
        assert_eq!(forced.to_run().len(), 3);
    }

    #[tokio::test]
    async fn test_configured_force_reruns_fresh_stages() {
        let ws = TestWorkspace::new();
        ws.write("src.txt", "source");
        engine(&ws, runner()).run(&[], false).await.unwrap();

        let runner = runner();
        let forced = engine_with(EngineConfig::new(ws.root()).with_force(true), runner.clone());
        let plan = forced.dry_run(&[], false).await.unwrap();
        assert_eq!(plan.to_run().len(), 3);

        let report = forced.run(&[], false).await.unwrap();
        assert_eq!(report.completed_count(), 3);
        assert_eq!(report.get("b").unwrap().reason.as_deref(), Some("forced"));
        assert_eq!(runner.called_stages(), vec!["a", "b", "other"]);
    }

    #[tokio::test]
    async fn test_build_follows_configured_dry_run() {
        let ws = TestWorkspace::new();
        ws.write("src.txt", "source");
        let runner = runner();

        let dry = engine_with(EngineConfig::new(ws.root()).with_dry_run(true), runner.clone());
        let outcome = dry.build(&[]).await.unwrap();
        assert!(matches!(&outcome, BuildOutcome::Planned(plan) if plan.to_run().len() == 3));
        assert!(runner.calls().is_empty());
        assert!(!ws.exists("dvc.lock"));

        let outcome = engine(&ws, runner.clone()).build(&[]).await.unwrap();
        assert!(matches!(&outcome, BuildOutcome::Ran(report) if report.is_success()));
        assert!(ws.exists("dvc.lock"));
    }

    #[tokio::test]
    async fn test_run_then_validate() {
        let ws = TestWorkspace::new();
        ws.write("src.txt", "source");
        let engine = engine(&ws, runner());

        let report = engine.run(&[], false).await.unwrap();
        assert_eq!(report.status("b"), Some(StageStatus::Completed));

        let validation = engine.validate(&[]).await.unwrap();
        assert!(validation.is_reproducible());
        assert_eq!(validation.checked.len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_manifest_is_fatal() {
        let ws = TestWorkspace::new();
        ws.write("src.txt", "source");
        ws.write("dvc.lock", "schema: '9.0'\n");
        let err = engine(&ws, runner()).run(&[], false).await.unwrap_err();
        assert_eq!(err.kind(), "manifest");
    }
}

//! `stagerun` command-line front end.
//!
//! Exit codes: 0 when everything is up to date (or reproducible), 1 when
//! stages failed or outputs were not reproducible, 2 when the pipeline could
//! not be loaded, planned or recorded.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, GlobalArgs, GraphFormat};
use serde::Serialize;
use stagerun::observability::init_tracing;
use stagerun::prelude::*;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;

const EXIT_STAGE_FAILURE: u8 = 1;
const EXIT_BUILD_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose, cli.global.log_format.into());

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_STAGE_FAILURE),
        Err(e) => {
            let kind = e
                .downcast_ref::<BuildError>()
                .map_or("error", BuildError::kind);
            eprintln!("stagerun: {kind} error: {e:#}");
            ExitCode::from(EXIT_BUILD_ERROR)
        }
    }
}

/// Runs one subcommand. Returns false when stages failed.
async fn execute(cli: Cli) -> Result<bool> {
    let config = apply_command_flags(build_config(&cli.global)?, &cli.command);
    let json = cli.global.json;
    let engine = Engine::from_config(config)?
        .with_event_sink(Arc::new(LoggingEventSink::new(Level::INFO)));

    match cli.command {
        Command::Run(args) => match engine.build(&args.targets.targets).await? {
            BuildOutcome::Planned(plan) => {
                print_plan(&plan, json)?;
                Ok(true)
            }
            BuildOutcome::Ran(report) => {
                print_run(&report, json)?;
                Ok(report.is_success())
            }
        },
        Command::Plan(args) => {
            let plan = engine.dry_run(&args.targets.targets, false).await?;
            print_plan(&plan, json)?;
            Ok(true)
        }
        Command::Validate(args) => {
            let report = engine.validate(&args.targets).await?;
            print_validation(&report, json)?;
            Ok(report.is_reproducible())
        }
        Command::Graph(args) => {
            let graph = engine.graph(&args.targets.targets)?;
            match args.format {
                GraphFormat::Dot => println!("{}", graph.to_dot()),
                GraphFormat::Mermaid => println!("{}", graph.to_mermaid()),
            }
            Ok(true)
        }
    }
}

/// Layers the environment and then explicit flags over the defaults.
fn build_config(global: &GlobalArgs) -> Result<EngineConfig> {
    let mut config = EngineConfig::new(&global.root).with_env_overrides()?;
    if let Some(file) = &global.pipeline_file {
        config = config.with_pipeline_file(file);
    }
    if let Some(manifest) = &global.manifest {
        config = config.with_manifest_file(manifest);
    }
    if let Some(jobs) = global.jobs {
        config = config.with_jobs(jobs);
    }
    config
        .validate()
        .with_context(|| format!("invalid configuration for {}", global.root.display()))?;
    Ok(config)
}

/// Copies `--force` and `--dry-run` into the configuration.
fn apply_command_flags(config: EngineConfig, command: &Command) -> EngineConfig {
    match command {
        Command::Run(args) => config.with_force(args.force).with_dry_run(args.dry_run),
        Command::Plan(args) => config.with_force(args.force),
        Command::Validate(_) | Command::Graph(_) => config,
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_run(report: &RunReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    for stage in &report.stages {
        let detail = stage.reason.as_deref().unwrap_or_default();
        println!("{:>13}  {}  {detail}", stage.status.to_string(), stage.stage);
        if let Some(error) = &stage.error {
            println!("{:>13}  {error}", "");
        }
        if let Some(diagnostics) = &stage.diagnostics {
            for line in diagnostics.lines() {
                println!("{:>13}  | {line}", "");
            }
        }
    }
    match report.failure() {
        Some(failure) => eprintln!("{failure}"),
        None => println!(
            "{} ran, {} up to date in {} ms",
            report.completed_count(),
            report.skipped_count(),
            report.duration_ms()
        ),
    }
    Ok(())
}

fn print_plan(plan: &Plan, json: bool) -> Result<()> {
    if json {
        return print_json(plan);
    }
    for (index, level) in plan.levels.iter().enumerate() {
        println!("level {index}:");
        for name in level {
            if let Some(stage) = plan.get(name) {
                let mark = if stage.will_run { "run " } else { "skip" };
                println!("  {mark}  {name}  ({})", stage.reason);
            }
        }
    }
    Ok(())
}

fn print_validation(report: &ReproducibilityReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    if let Some(failure) = report.run.failure() {
        eprintln!("re-run failed, nothing compared: {failure}");
        return Ok(());
    }
    for entry in &report.non_reproducible {
        println!(
            "not reproducible  {}  {}  {} -> {}",
            entry.stage, entry.path, entry.before, entry.after
        );
    }
    for entry in &report.unverified {
        match &entry.path {
            Some(path) => println!("unverified        {}  {path}", entry.stage),
            None => println!("unverified        {}", entry.stage),
        }
    }
    println!(
        "{} stage(s) checked, {} output(s) changed",
        report.checked.len(),
        report.non_reproducible.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "stagerun", "-C", "/work", "-f", "p.yaml", "--manifest", "m.lock", "-j", "2", "plan",
        ]);
        let config = build_config(&cli.global).unwrap();
        assert_eq!(config.pipeline_path(), PathBuf::from("/work/p.yaml"));
        assert_eq!(config.manifest_path(), PathBuf::from("/work/m.lock"));
        assert_eq!(config.jobs, 2);
    }

    #[test]
    fn test_run_flags_reach_the_config() {
        let cli = parse(&["stagerun", "run", "--force", "--dry-run", "train"]);
        let config = apply_command_flags(build_config(&cli.global).unwrap(), &cli.command);
        assert!(config.force);
        assert!(config.dry_run);

        let cli = parse(&["stagerun", "plan"]);
        let config = apply_command_flags(build_config(&cli.global).unwrap(), &cli.command);
        assert!(!config.force);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let cli = parse(&["stagerun", "-j", "0", "plan"]);
        assert!(build_config(&cli.global).is_err());
    }

    #[tokio::test]
    async fn test_missing_pipeline_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let err = execute(parse(&["stagerun", "-C", &root, "plan"]))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<BuildError>().map(BuildError::kind),
            Some("configuration")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_stage_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("dvc.yaml"),
            "stages:\n  ok:\n    cmd: echo hi > ok.txt\n    outs: [ok.txt]\n  bad:\n    cmd: exit 3\n",
        )
        .unwrap();
        let root = dir.path().to_string_lossy().into_owned();

        let ok = execute(parse(&["stagerun", "-C", &root, "run", "ok"])).await;
        assert!(ok.unwrap());
        let all = execute(parse(&["stagerun", "-C", &root, "run"])).await;
        assert!(!all.unwrap());
    }
}

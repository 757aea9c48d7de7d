//! Command-line arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "stagerun",
    version,
    about = "Run declarative pipelines, rebuilding only stages whose inputs changed",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Pipeline root; commands run here and paths resolve against it
    #[arg(short = 'C', long, value_name = "DIR", default_value = ".", global = true)]
    pub root: PathBuf,

    /// Pipeline definition file, relative to the root
    #[arg(short = 'f', long = "file", value_name = "PATH", global = true)]
    pub pipeline_file: Option<PathBuf>,

    /// Manifest file, relative to the root
    #[arg(long, value_name = "PATH", global = true)]
    pub manifest: Option<PathBuf>,

    /// Maximum number of commands running at once
    #[arg(short, long, value_name = "N", global = true)]
    pub jobs: Option<usize>,

    /// Emit machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log record format on stderr
    #[arg(long, value_enum, default_value_t = LogFormatArg::Text, global = true)]
    pub log_format: LogFormatArg,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring stages up to date
    Run(RunArgs),
    /// Show execution levels and which stages would run
    Plan(PlanArgs),
    /// Re-run stages and report outputs that changed
    Validate(TargetArgs),
    /// Print the stage graph
    Graph(GraphArgs),
}

/// Stage selection.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Stages to build, plus everything they depend on (default: all)
    #[arg(value_name = "STAGE")]
    pub targets: Vec<String>,
}

/// `run` inputs.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Run every selected stage regardless of freshness
    #[arg(long)]
    pub force: bool,

    /// Report what would run without running anything
    #[arg(short = 'd', long)]
    pub dry_run: bool,
}

/// `plan` inputs.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Plan as if every stage were stale
    #[arg(long)]
    pub force: bool,
}

/// `graph` inputs.
#[derive(Args, Debug)]
pub struct GraphArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
    pub format: GraphFormat,
}

/// Graph renderings.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    /// GraphViz DOT
    Dot,
    /// Mermaid flowchart
    Mermaid,
}

/// Log formats.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    /// Human-readable lines
    Text,
    /// One JSON object per record
    Json,
}

impl From<LogFormatArg> for stagerun::observability::LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_targets() {
        let cli = Cli::try_parse_from(["stagerun", "run", "train", "eval", "--force", "-j", "3"])
            .unwrap();
        assert_eq!(cli.global.jobs, Some(3));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.targets.targets, vec!["train", "eval"]);
        assert!(args.force);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stagerun", "graph", "--format", "mermaid", "-C", "/work", "-f", "alt.yaml",
        ])
        .unwrap();
        assert_eq!(cli.global.root, PathBuf::from("/work"));
        assert_eq!(cli.global.pipeline_file, Some(PathBuf::from("alt.yaml")));
        let Command::Graph(args) = cli.command else {
            panic!("expected graph");
        };
        assert_eq!(args.format, GraphFormat::Mermaid);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["stagerun"]).is_err());
        assert!(Cli::try_parse_from(["stagerun", "graph", "--format", "svg"]).is_err());
    }
}

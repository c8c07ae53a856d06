//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Vaultscan -- repository artifact scanning against an analysis service.
///
/// Use `vaultscan <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "vaultscan", version, about, long_about = None)]
pub struct Cli {
    /// Path to the vaultscan.toml configuration file.
    #[arg(short, long, default_value = "vaultscan.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Repository task selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TaskKindArg {
    /// Binary scan task (`[scan]` section).
    Scan,
    /// Inspection task (`[inspect]` section).
    Inspect,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration.
    Config(ConfigArgs),

    /// Show which artifacts the next run would process (dry run).
    Plan(PlanArgs),

    /// Show the status ledger of a repository.
    Status(StatusArgs),

    /// Reset ledger entries so artifacts are processed again.
    Reset(ResetArgs),
}

// ---- config ----

/// Manage vaultscan configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and both task sections.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, server, scan, inspect).
        #[arg(long)]
        section: Option<String>,
    },
}

// ---- catalog selection (shared) ----

/// Location of the directory-backed catalog.
#[derive(Args, Debug)]
pub struct CatalogArgs {
    /// Catalog root directory (one sub-directory per repository).
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Repository key. Every repository under the root when omitted.
    #[arg(short, long)]
    pub repository: Option<String>,
}

// ---- plan ----

/// Evaluate artifact eligibility without contacting the analysis service.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Task whose selection rules are applied.
    #[arg(long, default_value = "scan")]
    pub task: TaskKindArg,

    /// Also list skipped artifacts and the skip reason.
    #[arg(short, long)]
    pub verbose: bool,
}

// ---- status ----

/// Display ledger entries.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Only show artifacts in FAILURE.
    #[arg(long)]
    pub failed: bool,
}

// ---- reset ----

/// Ledger maintenance.
#[derive(Args, Debug)]
pub struct ResetArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[command(subcommand)]
    pub action: ResetAction,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetAction {
    /// Remove every status panel.
    All,
    /// Remove FAILURE panels.
    Failures,
    /// Remove PENDING panels older than the retry window.
    StalePending {
        /// Retry window in hours (defaults to the `[scan]` setting).
        #[arg(long)]
        window_hours: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_config_validate() {
        let cli = Cli::try_parse_from(["vaultscan", "config", "validate"]).expect("parse succeeded");
        assert_eq!(cli.config, PathBuf::from("vaultscan.toml"));
        match cli.command {
            Commands::Config(args) => assert!(matches!(args.action, ConfigAction::Validate)),
            _ => panic!("expected Config command"),
        }
    }

    #[test]
    fn test_cli_parse_config_show_section() {
        let cli = Cli::try_parse_from(["vaultscan", "config", "show", "--section", "server"])
            .expect("parse succeeded");
        match cli.command {
            Commands::Config(args) => match args.action {
                ConfigAction::Show { section } => assert_eq!(section.as_deref(), Some("server")),
                _ => panic!("expected Show action"),
            },
            _ => panic!("expected Config command"),
        }
    }

    #[test]
    fn test_cli_parse_plan_defaults() {
        let cli = Cli::try_parse_from(["vaultscan", "plan"]).expect("parse succeeded");
        match cli.command {
            Commands::Plan(args) => {
                assert_eq!(args.catalog.root, PathBuf::from("."));
                assert!(args.catalog.repository.is_none());
                assert_eq!(args.task, TaskKindArg::Scan);
                assert!(!args.verbose);
            }
            _ => panic!("expected Plan command"),
        }
    }

    #[test]
    fn test_cli_parse_plan_inspect_repository() {
        let cli = Cli::try_parse_from([
            "vaultscan",
            "plan",
            "--root",
            "/srv/catalog",
            "-r",
            "maven-releases",
            "--task",
            "inspect",
            "-v",
        ])
        .expect("parse succeeded");
        match cli.command {
            Commands::Plan(args) => {
                assert_eq!(args.catalog.root, PathBuf::from("/srv/catalog"));
                assert_eq!(args.catalog.repository.as_deref(), Some("maven-releases"));
                assert_eq!(args.task, TaskKindArg::Inspect);
                assert!(args.verbose);
            }
            _ => panic!("expected Plan command"),
        }
    }

    #[test]
    fn test_cli_parse_status_failed_only() {
        let cli = Cli::try_parse_from(["vaultscan", "status", "--failed", "-r", "releases"])
            .expect("parse succeeded");
        match cli.command {
            Commands::Status(args) => {
                assert!(args.failed);
                assert_eq!(args.catalog.repository.as_deref(), Some("releases"));
            }
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn test_cli_parse_reset_stale_pending_window() {
        let cli = Cli::try_parse_from([
            "vaultscan",
            "reset",
            "-r",
            "releases",
            "stale-pending",
            "--window-hours",
            "6",
        ])
        .expect("parse succeeded");
        match cli.command {
            Commands::Reset(args) => assert_eq!(
                args.action,
                ResetAction::StalePending {
                    window_hours: Some(6)
                }
            ),
            _ => panic!("expected Reset command"),
        }
    }

    #[test]
    fn test_cli_parse_reset_requires_action() {
        let result = Cli::try_parse_from(["vaultscan", "reset"]);
        assert!(result.is_err(), "reset without an action should fail");
    }

    #[test]
    fn test_cli_global_output_flag() {
        let cli = Cli::try_parse_from(["vaultscan", "status", "--output", "json"])
            .expect("parse succeeded");
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn test_cli_rejects_unknown_task() {
        let result = Cli::try_parse_from(["vaultscan", "plan", "--task", "deploy"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}

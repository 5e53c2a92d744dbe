use std::path::PathBuf;

use clap::{Parser, Subcommand};
use relaymint_deploy::{CONFIG_FILENAME, Command, Step};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "relaymint")]
#[command(
    author,
    version,
    about = "Deploy a token through a fee-paying relay, one resumable step at a time"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "RELAYMINT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a relaymint.toml configuration file (or the directory holding it).
    ///
    /// If not provided, ./relaymint.toml is used when present. Every setting can also
    /// be given as a RELAYMINT_* environment variable.
    #[arg(short, long, alias = "conf", env = "RELAYMINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the deployment name from the configuration.
    #[arg(short, long)]
    pub deployment: Option<String>,

    /// Run every step non-interactively.
    #[arg(long)]
    pub all: bool,

    /// Build and sign operations without submitting or recording anything.
    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum CliCommand {
    /// Run every step in order.
    Run,

    /// Run a single step.
    Step {
        /// One of: create-asset, mint-supply, set-metadata, lock-authorities.
        step: Step,
    },

    /// Show the deployment status as observed on the ledger.
    Status,

    /// Preview every step without submitting anything.
    DryRun,

    /// Forget local progress. On-chain state is never changed.
    Rollback {
        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Write a starter configuration file.
    Init {
        #[arg(default_value = CONFIG_FILENAME)]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration with secrets redacted.
    Config,

    /// Generate shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

impl CliCommand {
    /// The orchestrator command this maps to, if any.
    pub fn to_command(&self) -> Option<Command> {
        match self {
            CliCommand::Run => Some(Command::RunAll),
            CliCommand::Step { step } => Some(Command::RunStep(*step)),
            CliCommand::Status => Some(Command::Status),
            CliCommand::DryRun => Some(Command::DryRunAll),
            CliCommand::Rollback { .. } => Some(Command::Rollback),
            CliCommand::Init { .. } | CliCommand::Config | CliCommand::Completions { .. } => None,
        }
    }
}

pub const MENU: &str = "\
  1) Run all steps
  2) Create asset
  3) Mint supply
  4) Set metadata
  5) Lock authorities
  6) Status
  7) Dry run (all steps)
  8) Rollback local progress
  0) Exit";

/// Parse an interactive menu choice, by number or by name.
pub fn parse_menu_choice(input: &str) -> Option<Command> {
    let input = input.trim().to_ascii_lowercase();
    let command = match input.as_str() {
        "1" | "run" | "all" => Command::RunAll,
        "2" => Command::RunStep(Step::CreateAsset),
        "3" => Command::RunStep(Step::MintSupply),
        "4" => Command::RunStep(Step::SetMetadata),
        "5" => Command::RunStep(Step::LockAuthorities),
        "6" | "status" => Command::Status,
        "7" | "dry-run" => Command::DryRunAll,
        "8" | "rollback" => Command::Rollback,
        "0" | "exit" | "quit" | "q" => Command::Exit,
        other => Command::RunStep(other.parse().ok()?),
    };
    Some(command)
}

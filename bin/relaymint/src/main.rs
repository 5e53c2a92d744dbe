//! relaymint deploys a token through a fee-paying relay, one resumable step at a time.

mod cli;

use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, CliCommand, MENU, parse_menu_choice};
use relaymint_deploy::{
    CONFIG_FILENAME, Command, CommandOutcome, DeployConfig, DeployError, FileCheckpointStore,
    HttpRelay, IdentityStore, Orchestrator, RpcLedger, StatusReport,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match &cli.command {
        Some(CliCommand::Init { path, force }) => return init(path, *force),
        Some(CliCommand::Completions { shell }) => {
            clap_complete::generate(*shell, &mut Cli::command(), "relaymint", &mut io::stdout());
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    // Fall back to ./relaymint.toml when no configuration is given.
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from(CONFIG_FILENAME);
        local.exists().then_some(local)
    });
    let mut config = DeployConfig::load(config_path.as_deref())?;
    if cli.dry_run {
        config.dry_run = true;
    }
    if let Some(deployment) = &cli.deployment {
        config.deployment = deployment.clone();
    }

    if cli.command == Some(CliCommand::Config) {
        print!("{}", config.to_redacted_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    let settings = config.resolve()?;
    let identity = IdentityStore::new(&settings.identity_path).load_or_create()?;
    let ledger = RpcLedger::new(&settings.ledger)?;
    let relay = HttpRelay::new(settings.relay.request_timeout)?;
    let store = FileCheckpointStore::new(&settings.state_dir);

    tracing::info!(
        deployment = %settings.deployment,
        identity = %identity.address(),
        relay = %settings.relay.endpoint,
        dry_run = settings.dry_run,
        "relaymint ready"
    );

    let orchestrator = Orchestrator::new(&settings, identity, ledger, relay, &store);

    let command = match &cli.command {
        Some(CliCommand::Rollback { yes }) => {
            if !*yes && !confirm_rollback(&settings.deployment)? {
                println!("Rollback cancelled");
                return Ok(ExitCode::SUCCESS);
            }
            Some(Command::Rollback)
        }
        Some(command) => command.to_command(),
        None if cli.all => Some(Command::RunAll),
        None => None,
    };

    let code = match command {
        Some(command) => {
            let outcome = orchestrator.dispatch(command).await;
            render(&outcome);
            outcome.exit_code()
        }
        None => interactive(&orchestrator).await?,
    };

    Ok(ExitCode::from(code as u8))
}

/// Read menu choices from stdin until `exit`.
async fn interactive<L, T>(orchestrator: &Orchestrator<'_, L, T>) -> Result<i32>
where
    L: relaymint_deploy::Ledger,
    T: relaymint_deploy::RelayTransport,
{
    let stdin = io::stdin();
    loop {
        println!();
        println!("{}", MENU);
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let mut line = String::new();
        if stdin
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?
            == 0
        {
            return Ok(0);
        }

        let Some(command) = parse_menu_choice(&line) else {
            println!("Unknown choice: {}", line.trim());
            continue;
        };
        if command == Command::Rollback && !confirm_rollback(&orchestrator.settings().deployment)? {
            println!("Rollback cancelled");
            continue;
        }

        let outcome = orchestrator.dispatch(command).await;
        render(&outcome);
        match outcome {
            CommandOutcome::Exit => return Ok(0),
            // Local storage is broken; continuing could lose track of on-chain progress.
            CommandOutcome::Failed(DeployError::StorageFailure { .. }) => return Ok(1),
            _ => {}
        }
    }
}

fn confirm_rollback(deployment: &str) -> Result<bool> {
    println!(
        "Rollback forgets local progress for '{}'. Anything already on the ledger stays there.",
        deployment
    );
    print!("Type 'yes' to continue: ");
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read from stdin")?;
    Ok(answer.trim() == "yes")
}

fn render(outcome: &CommandOutcome) {
    match outcome {
        CommandOutcome::Ran(report) => print!("{}", report),
        CommandOutcome::Status(report) => print_status(report),
        CommandOutcome::RolledBack(report) => print!("{}", report),
        CommandOutcome::Exit => {}
        CommandOutcome::Failed(err) => {
            tracing::error!(error = %err, "Command failed");
            eprintln!("Error: {}", err);
        }
    }
}

fn print_status(report: &StatusReport) {
    print!("{}", report.header());

    let mut steps = Table::new();
    steps
        .load_preset(UTF8_FULL)
        .set_header(vec!["Step", "Ledger", "Checkpoint"]);
    for status in &report.steps {
        steps.add_row(vec![
            status.step.label().to_string(),
            if status.complete { "done" } else { "pending" }.to_string(),
            if status.recorded { "recorded" } else { "-" }.to_string(),
        ]);
    }
    println!("{steps}");

    if let Some(supply) = &report.supply {
        println!(
            "Supply: {} base units ({} decimals), target {}, treasury balance {}",
            supply.supply,
            supply.decimals,
            supply
                .target
                .map_or_else(|| "overflow".to_string(), |t| t.to_string()),
            supply
                .treasury_balance
                .map_or_else(|| "none".to_string(), |b| b.to_string()),
        );
    }

    if !report.authorities.is_empty() {
        let mut authorities = Table::new();
        authorities
            .load_preset(UTF8_FULL)
            .set_header(vec!["Authority", "Current", "Target"]);
        for authority in &report.authorities {
            authorities.add_row(vec![
                authority.slot.to_string(),
                authority
                    .current
                    .map_or_else(|| "revoked (permanent)".to_string(), |a| a.to_string()),
                authority
                    .target
                    .map_or_else(|| "revoked".to_string(), |a| a.to_string()),
            ]);
        }
        println!("Authority policy: {}", report.policy);
        println!("{authorities}");
    }
}

/// Write a starter configuration file.
fn init(path: &Path, force: bool) -> Result<ExitCode> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }
    std::fs::write(path, DeployConfig::starter_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Starter configuration written");
    Ok(ExitCode::SUCCESS)
}

//! hj-admin - HUGANJOB ledger maintenance

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hj_admin::{roster, status, unsubscribe};
use hj_common::config::{LedgerPaths, RootFolderResolver};
use hj_common::ledger::MatchOutcome;
use hj_common::time::format_timestamp;
use hj_common::UnsubscribeSource;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for hj-admin
#[derive(Parser, Debug)]
#[command(name = "hj-admin")]
#[command(about = "HUGANJOB ledger maintenance")]
#[command(version)]
struct Cli {
    /// Data root (overrides HUGANJOB_ROOT and the TOML overlay)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// INI file (default: <root>/config/huganjob_email_config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Unsubscribe intake and review
    Unsubscribe {
        #[command(subcommand)]
        command: UnsubscribeCommands,
    },

    /// Pin a company's address for the next sender run
    Override {
        /// Company id
        #[arg(long)]
        id: u64,
        /// Address to send to from now on
        #[arg(long)]
        email: String,
    },

    /// Remove never-contacted companies and re-sequence ids
    Decommission {
        /// Comma-separated company ids
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<u64>,
        /// Seconds to wait for the sender's process lock
        #[arg(long, default_value_t = 10)]
        lock_timeout: u64,
    },

    /// Summarize every ledger
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum UnsubscribeCommands {
    /// Record one opt-out request
    Add {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        reason: String,
        /// manual, form or sheets-adapter
        #[arg(long, default_value = "manual", value_parser = parse_source)]
        source: UnsubscribeSource,
    },

    /// Import a spreadsheet export (timestamp, email, reason columns)
    Import {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "sheets-adapter", value_parser = parse_source)]
        source: UnsubscribeSource,
    },

    /// Replay the whole ledger onto the prospect rows
    Sync,

    /// List events that matched no single company
    Ambiguous,
}

fn parse_source(raw: &str) -> std::result::Result<UnsubscribeSource, String> {
    UnsubscribeSource::parse(raw).ok_or_else(|| format!("unknown source '{}'", raw))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let resolver = RootFolderResolver::new(cli.root.clone());

    let default_filter = format!(
        "hj_admin={level},hj_common={level}",
        level = resolver.log_level()
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli, resolver) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("hj-admin: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, resolver: RootFolderResolver) -> Result<()> {
    let root = resolver.resolve();
    info!("Data root: {}", root.display());
    let (paths, _) =
        LedgerPaths::load(&root, cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Unsubscribe { command } => run_unsubscribe(&paths, command),
        Commands::Override { id, email } => {
            let attempt = roster::record_override(&paths, id, &email)
                .with_context(|| format!("Failed to record override for company {}", id))?;
            println!("company {}: next run sends to {}", id, attempt.address);
            Ok(())
        }
        Commands::Decommission { ids, lock_timeout } => {
            let report = roster::decommission(&paths, &ids, Duration::from_secs(lock_timeout))
                .context("Decommission refused")?;
            println!("removed: {:?}", report.removed);
            for (old, new) in &report.renumbered {
                println!("  {} -> {}", old, new);
            }
            Ok(())
        }
        Commands::Status { json } => {
            let summary = status::collect(&paths).context("Failed to read ledgers")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", summary);
            }
            Ok(())
        }
    }
}

fn run_unsubscribe(paths: &LedgerPaths, command: UnsubscribeCommands) -> Result<()> {
    match command {
        UnsubscribeCommands::Add { email, reason, source } => {
            let outcome = unsubscribe::add(paths, &email, &reason, source)
                .context("Failed to record unsubscribe")?;
            println!(
                "{}: {}{}",
                outcome.event.email,
                describe(&outcome.matched),
                if outcome.mirrored { ", row updated" } else { "" }
            );
        }
        UnsubscribeCommands::Import { file, source } => {
            let report = unsubscribe::import(paths, &file, source)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!(
                "{} rows: {} appended, {} already present, {} invalid, {} ambiguous, {} unmatched, {} rows updated",
                report.rows,
                report.appended,
                report.already_present,
                report.invalid,
                report.ambiguous,
                report.unmatched,
                report.mirrored
            );
        }
        UnsubscribeCommands::Sync => {
            let changed = unsubscribe::sync(paths).context("Failed to replay unsubscribes")?;
            println!("{} rows updated {:?}", changed.len(), changed);
        }
        UnsubscribeCommands::Ambiguous => {
            let pending = unsubscribe::ambiguous(paths).context("Failed to read unsubscribes")?;
            if pending.is_empty() {
                println!("no unmatched unsubscribe events");
            }
            for item in pending {
                println!(
                    "{}  {}  {}  {}",
                    format_timestamp(&item.event.submitted_at),
                    item.event.email,
                    item.event.source,
                    describe(&item.current)
                );
            }
        }
    }
    Ok(())
}

fn describe(outcome: &MatchOutcome) -> String {
    match outcome {
        MatchOutcome::Exact(id) => format!("matched company {} by address", id),
        MatchOutcome::Domain(id) => format!("matched company {} by domain", id),
        MatchOutcome::Ambiguous(ids) => format!("ambiguous between {:?}", ids),
        MatchOutcome::Unmatched => "no matching company".to_string(),
    }
}

//! hj-bounce - HUGANJOB bounce ingestor
//!
//! Connects to the sender's mailbox, records delivery failure reports in the
//! Bounce Ledger and marks permanently bounced companies. Runs once by
//! default; `--watch` repeats at the configured poll interval.

use anyhow::{Context, Result};
use clap::Parser;
use hj_bounce::{BounceIngestor, ImapMailbox, IngestOptions, IngestReport, Mailbox};
use hj_common::config::{AppConfig, RootFolderResolver};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for hj-bounce
#[derive(Parser, Debug)]
#[command(name = "hj-bounce")]
#[command(about = "HUGANJOB bounce ingestor")]
#[command(version)]
struct Args {
    /// Search window in days
    #[arg(long, default_value_t = 7)]
    days: u32,

    /// Classify and log only; write nothing and archive nothing
    #[arg(long)]
    test_mode: bool,

    /// Process messages even if their UID was already handled
    #[arg(long)]
    force_reprocess: bool,

    /// Forget processed UIDs before this pass
    #[arg(long)]
    reset_tracking: bool,

    /// Keep polling at the configured interval until interrupted
    #[arg(long)]
    watch: bool,

    /// Data root (overrides HUGANJOB_ROOT and the TOML overlay)
    #[arg(long)]
    root: Option<PathBuf>,

    /// INI file (default: <root>/config/huganjob_email_config.ini)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let resolver = RootFolderResolver::new(args.root.clone());

    let default_filter = format!(
        "hj_bounce={level},hj_common={level}",
        level = resolver.log_level()
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hj-bounce v{}", env!("CARGO_PKG_VERSION"));

    match run(args, resolver).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("hj-bounce: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, resolver: RootFolderResolver) -> Result<()> {
    let root = resolver.resolve();
    info!("Data root: {}", root.display());

    let config = Arc::new(
        AppConfig::load(&root, args.config.as_deref()).context("Failed to load configuration")?,
    );
    let mut options = IngestOptions {
        days: args.days,
        test_mode: args.test_mode,
        force_reprocess: args.force_reprocess,
        reset_tracking: args.reset_tracking,
    };

    if !args.watch {
        let report = run_pass(config, options.clone()).await?;
        println!("hj-bounce: {}", report);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let interval = config.imap.poll_interval;
    info!(interval_secs = interval.as_secs(), "Watching mailbox");
    loop {
        match run_pass(config.clone(), options.clone()).await {
            Ok(report) => println!("hj-bounce: {}", report),
            // A failed pass is retried on the next tick
            Err(e) => warn!("Bounce pass failed: {:#}", e),
        }
        // Tracking resets only once per process
        options.reset_tracking = false;

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Stopping bounce watch");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// One connect, ingest, logout cycle on a blocking thread
async fn run_pass(config: Arc<AppConfig>, options: IngestOptions) -> Result<IngestReport> {
    tokio::task::spawn_blocking(move || -> Result<IngestReport> {
        let mut mailbox =
            ImapMailbox::connect(&config.imap).context("Failed to open bounce mailbox")?;
        let ingestor = BounceIngestor::new(&config);
        let result = ingestor.ingest(&mut mailbox, &options);
        if let Err(e) = mailbox.logout() {
            warn!("IMAP logout failed: {}", e);
        }
        result.context("Bounce ingest failed")
    })
    .await
    .context("Bounce worker panicked")?
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C"),
        _ = terminate => warn!("Received terminate signal"),
    }
}

//! hj-sender - HUGANJOB outreach sender
//!
//! Sends one run over an inclusive company id range:
//! lock → resolve → suppress → build → submit → record.
//!
//! Exit codes: 0 when every company reached a non-failure outcome,
//! 1 on abort (config, lock, ledger), interruption, or any failed attempt.

use anyhow::{Context, Result};
use clap::Parser;
use hj_common::config::{AppConfig, RootFolderResolver};
use hj_sender::dns::DnsDomainCheck;
use hj_sender::{EmailFormat, Pipeline, RunRequest, RunSummary, SmtpTransport, TemplateBundle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for hj-sender
#[derive(Parser, Debug)]
#[command(name = "hj-sender")]
#[command(about = "HUGANJOB outreach sender")]
#[command(version)]
struct Args {
    /// First company id (inclusive)
    #[arg(long, default_value_t = 1)]
    start_id: u64,

    /// Last company id (inclusive)
    #[arg(long, default_value_t = 5)]
    end_id: u64,

    /// Maximum number of messages submitted to SMTP in this run
    #[arg(long)]
    max_emails: Option<usize>,

    /// Body layout
    #[arg(long, value_enum, default_value_t = EmailFormat::HtmlText)]
    email_format: EmailFormat,

    /// Check recipient domains for MX/address records before sending
    #[arg(long)]
    enable_dns: bool,

    /// Data root (overrides HUGANJOB_ROOT and the TOML overlay)
    #[arg(long)]
    root: Option<PathBuf>,

    /// INI file (default: <root>/config/huganjob_email_config.ini)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to wait for the process lock
    #[arg(long)]
    lock_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let resolver = RootFolderResolver::new(args.root.clone());

    // Initialize tracing
    let default_filter = format!(
        "hj_sender={level},hj_common={level}",
        level = resolver.log_level()
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hj-sender v{}", env!("CARGO_PKG_VERSION"));

    match run(args, resolver).await {
        Ok(summary) => {
            println!("hj-sender: {}", summary);
            if summary.exit_code() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("hj-sender: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, resolver: RootFolderResolver) -> Result<RunSummary> {
    let root = resolver.resolve();
    info!("Data root: {}", root.display());

    let config = AppConfig::load(&root, args.config.as_deref()).context("Failed to load configuration")?;
    let templates = TemplateBundle::load(&config, args.email_format).context("Failed to load templates")?;
    let transport = SmtpTransport::new(&config).context("Failed to configure SMTP transport")?;

    let cancel = CancellationToken::new();
    let mut pipeline = Pipeline::new(config, templates, Arc::new(transport)).with_cancellation(cancel.clone());
    if let Some(secs) = args.lock_timeout {
        pipeline = pipeline.with_lock_timeout(Duration::from_secs(secs));
    }
    if args.enable_dns {
        pipeline = pipeline.with_domain_check(Arc::new(
            DnsDomainCheck::from_system_conf().context("Failed to initialize DNS resolver")?,
        ));
        info!("DNS pre-check enabled");
    }

    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let request = RunRequest {
        start_id: args.start_id,
        end_id: args.end_id,
        max_emails: args.max_emails,
        format: args.email_format,
    };
    Ok(pipeline.run(&request).await?)
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
        _ = ctrl_c => {
            warn!("Received Ctrl+C, finishing current company and stopping");
        },
        _ = terminate => {
            warn!("Received terminate signal, finishing current company and stopping");
        },
    }
}

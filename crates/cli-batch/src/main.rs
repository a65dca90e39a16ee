use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::{Context, Result};
use batch::{BatchOrchestrator, FfmpegToolkit, LogReporter, ProbeFailurePolicy, TranscodeConfig};
use clap::Parser;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

/// Exit status after an operator interrupt (128 + SIGINT)
const EXIT_INTERRUPTED: u8 = 130;

/// Batch transcode video files to HEVC
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target directory to search for video files
    target_directory: PathBuf,

    /// Preview the number of files to be transcoded (no actual transcoding)
    #[arg(long)]
    dry_run: bool,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of files to process concurrently
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Leave files alone when their codec cannot be determined
    #[arg(long)]
    skip_probe_failures: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Cancel `token` on Ctrl-C (and SIGTERM on unix)
fn install_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }

        debug!("Interrupt received, stopping after the current step");
        token.cancel();
    });
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut cfg = TranscodeConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(jobs) = args.jobs {
        cfg.workers = jobs;
    }
    if args.skip_probe_failures {
        cfg.probe_failure_policy = ProbeFailurePolicy::Skip;
    }
    cfg.validate().context("Invalid configuration")?;

    debug!("Configuration: {:?}", cfg);
    info!("Target directory: {}", args.target_directory.display());
    if args.dry_run {
        info!("Dry run: no files will be transcoded");
    }

    let toolkit = FfmpegToolkit::new(&cfg);
    toolkit
        .validate(!args.dry_run)
        .await
        .context("Required media tools are unavailable")?;

    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone());

    let orchestrator = BatchOrchestrator::new(cfg, Arc::new(toolkit), Arc::new(LogReporter))
        .with_cancellation(cancel);

    let summary = orchestrator
        .run(&args.target_directory, args.dry_run)
        .await?;

    if summary.interrupted {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

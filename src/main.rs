//! stingwatch — GSM IMSI-catcher detector.
//!
//! Ingests GSMTAP-encapsulated GSM signalling from a radio interface or a
//! capture file, stores the security-relevant subset, and continuously
//! scores detection heuristics into a 1-5 threat level. Run
//! `stingwatch --help` for usage.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod config;
mod decoder;
mod indicator;
mod metrics;
mod run;
mod store;

use cli::Cli;
use config::DetectorConfig;
use gsm_ingest::SourceConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli)?;

    let config = DetectorConfig::from_cli(&cli)?;
    info!("threads requested: {}", config.threads);
    match &config.source {
        SourceConfig::File { path } => info!("input source: {}", path.display()),
        SourceConfig::Live { interface } => info!("input source: interface {}", interface),
    }

    run::run(config)
}

/// Log to stderr and to a file beside the database, at the CLI-selected
/// level. `RUST_LOG` can still override individual targets. The returned
/// guard flushes the file writer on exit.
fn init_logging(cli: &Cli) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(
            &log_dir,
            "stingwatch.log",
        ));

    let filter = EnvFilter::builder()
        .with_default_directive(cli.log_level().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    eprintln!("[*] logfile: {}", log_dir.join("stingwatch.log").display());
    Ok(guard)
}

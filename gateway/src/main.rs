mod config;
mod logging;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Routes requests to per-name entities with distributed tracing")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Starts the worker
    Run {
        #[arg(long)]
        config: PathBuf,
    },
    /// Loads and validates a config file without starting anything
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid logging DSN: {0}")]
    Logging(#[from] sentry::types::ParseDsnError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Worker(#[from] worker::WorkerError),
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Run { config } => run(&config),
        CliCommand::Validate { config } => {
            let config = Config::from_file(&config)?;
            config
                .worker
                .validate()
                .map_err(worker::WorkerError::from)?;
            println!("Config is valid");
            Ok(())
        }
    }
}

fn run(path: &std::path::Path) -> Result<(), CliError> {
    let config = Config::from_file(path)?;
    let _sentry_guard = logging::init(config.common.logging.as_ref())?;

    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }

    tracing::info!(config = %path.display(), "Starting gateway");
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(worker::run(config.worker))?;
    Ok(())
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some("gateway"))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    for defs in [entity::metrics_defs::ALL_METRICS, worker::metrics_defs::ALL_METRICS] {
        shared::metrics_defs::describe_all(defs);
    }
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Reporting metrics to statsd"
    );
    Ok(())
}

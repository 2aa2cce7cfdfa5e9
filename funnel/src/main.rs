mod config;

use crate::config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use ab_splitter::errors::SplitterError;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use std::path::PathBuf;
use std::process;
use submission_gateway::errors::SubmissionGatewayError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "funnel", version, about = "Landing page edge services")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Deduplicating lead submission proxy in front of Airtable
    SubmissionGateway(ConfigArgs),
    /// Landing page A/B splitter in front of the asset origin
    AbSplitter(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("missing `{0}` section in config file")]
    MissingSection(&'static str),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("submission gateway error: {0}")]
    SubmissionGateway(#[from] SubmissionGatewayError),
    #[error("ab splitter error: {0}")]
    AbSplitter(#[from] SplitterError),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "Exiting");
        eprintln!("{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_file_path = match &cli.command {
        CliCommand::SubmissionGateway(args) | CliCommand::AbSplitter(args) => {
            &args.config_file_path
        }
    };
    let config = Config::from_file(config_file_path)?;

    let _sentry = init_logging(config.common.logging.as_ref());
    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        CliCommand::SubmissionGateway(_) => {
            let mut gateway_config = config
                .submission_gateway
                .ok_or(CliError::MissingSection("submission_gateway"))?;
            gateway_config.apply_env_overrides(|name| std::env::var(name).ok());

            tracing::info!("Starting submission gateway");
            rt.block_on(submission_gateway::run(gateway_config))?;
        }
        CliCommand::AbSplitter(_) => {
            let splitter_config = config
                .ab_splitter
                .ok_or(CliError::MissingSection("ab_splitter"))?;

            tracing::info!("Starting ab splitter");
            rt.block_on(ab_splitter::run(splitter_config))?;
        }
    }

    Ok(())
}

/// Installs the fmt subscriber and, when a DSN is configured, Sentry with its
/// tracing layer. The returned guard flushes Sentry on drop.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(metrics_config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(
        metrics_config.statsd_host.as_str(),
        metrics_config.statsd_port,
    )
    .build(Some("funnel"))
    .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    describe_all(dedup_cache::metrics_defs::ALL_METRICS);
    describe_all(submission_gateway::metrics_defs::ALL_METRICS);
    describe_all(ab_splitter::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}

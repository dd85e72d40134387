mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError, MetricsConfig};
use detect_relay::RelayError;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use url::Url;

#[derive(Parser)]
#[command(version, about = "Upload relay in front of the object detection service")]
enum CliCommand {
    /// Serve the relay until it fails
    Run(RunArgs),
    /// Load and validate a config file, then exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to the YAML config file
    #[arg(long)]
    config: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Overrides `upstream.base_url` from the config file
    #[arg(long, env = "ML_SERVER_URL")]
    upstream_url: Option<Url>,
}

#[derive(thiserror::Error, Debug)]
enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("could not install metrics exporter: {0}")]
    Metrics(String),
}

fn main() -> Result<(), GatewayError> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Validate(args) => {
            load_config(&args.config, None)?;
            println!("{}: config ok", args.config.display());
            Ok(())
        }
        CliCommand::Run(args) => run(args),
    }
}

fn load_config(path: &std::path::Path, upstream_url: Option<Url>) -> Result<Config, ConfigError> {
    let mut config = Config::from_file(path)?;
    if let Some(url) = upstream_url {
        config.relay.upstream.base_url = url;
    }
    config.relay.validate()?;
    Ok(config)
}

fn run(args: RunArgs) -> Result<(), GatewayError> {
    let config = load_config(&args.config.config, args.upstream_url)?;

    // Sentry has to be up before any runtime threads are spawned
    let _sentry = config.sentry_dsn().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    init_tracing(&config);

    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(detect_relay::run(config.relay)).map_err(|e| {
        tracing::error!(error = %e, "relay stopped");
        GatewayError::from(e)
    })
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level()));
    let sentry_layer = config
        .sentry_dsn()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();
}

fn init_metrics(config: &MetricsConfig) -> Result<(), GatewayError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some("gateway"))
        .map_err(|e| GatewayError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| GatewayError::Metrics(e.to_string()))?;

    shared::metrics_defs::describe_all(detect_relay::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd exporter installed"
    );
    Ok(())
}

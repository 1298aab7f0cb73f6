use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

use accel_metrics::core::allocation::AllocationResolver;
use accel_metrics::platform::NvmlDriver;
use accel_metrics::{Config, MetricServer};

fn main() -> Result<()> {
    let matches = Command::new("accel-metrics")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Exports per-container accelerator utilization in the Prometheus format")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON config file; command line flags override its values")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("collection-interval")
                .long("collection-interval")
                .value_name("MS")
                .help("Metrics collection interval in milliseconds")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Port on which metrics are exposed")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("metrics-path")
                .long("metrics-path")
                .value_name("PATH")
                .help("HTTP path serving the metrics"),
        )
        .arg(
            Arg::new("resource-name")
                .long("resource-name")
                .value_name("NAME")
                .help("Extended resource name accelerators are allocated under"),
        )
        .arg(
            Arg::new("socket-path")
                .long("socket-path")
                .value_name("PATH")
                .help("Kubelet pod resources socket")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("device-pattern")
                .long("device-pattern")
                .value_name("REGEX")
                .help("Device path pattern; the first capture group is the device name"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    accel_metrics::init_logging(matches.get_flag("verbose"));

    let config = build_config(&matches)?;
    config.validate().context("Invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("accel-metrics")
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run(config))
}

fn build_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(interval) = matches.get_one::<u64>("collection-interval") {
        config.collection_interval_ms = *interval;
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(path) = matches.get_one::<String>("metrics-path") {
        config.metrics_path = path.clone();
    }
    if let Some(name) = matches.get_one::<String>("resource-name") {
        config.resource_name = name.clone();
    }
    if let Some(path) = matches.get_one::<PathBuf>("socket-path") {
        config.socket_path = path.clone();
    }
    if let Some(pattern) = matches.get_one::<String>("device-pattern") {
        config.device_path_pattern = pattern.clone();
    }

    Ok(config)
}

async fn run(config: Config) -> Result<()> {
    let shutdown = Arc::new(Notify::new());
    let handler_shutdown = Arc::clone(&shutdown);
    ctrlc::set_handler(move || handler_shutdown.notify_one())
        .context("Failed to install Ctrl-C handler")?;

    let source = AllocationResolver::from_config(&config);
    let mut server = MetricServer::new(config, NvmlDriver::new(), source)?;

    server
        .start()
        .await
        .context("Failed to start metrics server")?;

    shutdown.notified().await;

    server.stop().await?;
    Ok(())
}

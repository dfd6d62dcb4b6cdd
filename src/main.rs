//! # Varnish Request Tracker - Main Entry Point
//!
//! Long-running collector that:
//!
//! 1. Spawns (or reads) a `varnishlog`-style transaction log
//! 2. Reconstructs per-request state machines keyed by session id
//! 3. Emits request counts and latency percentiles to stdout once per
//!    interval, one `<metric-name> <epoch-seconds> <value>` line each
//!
//! Diagnostics go to stderr so stdout stays machine-readable.

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing::info;
use varnish_request_tracker::{
    Config,
    Manager,
    RequestRegistry,
    StatsReporter,
    StdoutSink,
};

#[derive(Parser)]
#[command(name = "varnish-request-tracker")]
#[command(about = "Cache request-lifecycle tracker and latency reporter")]
#[command(version)]
struct Cli {
    /// Command whose stdout is the transaction log (e.g. "varnishlog")
    #[arg(long, env = "VRT_LOG_COMMAND")]
    log_command: Option<String>,

    /// Replay the transaction log from a file instead of a command
    #[arg(long, env = "VRT_LOG_FILE", conflicts_with = "log_command")]
    log_file: Option<PathBuf>,

    /// Reporting interval (e.g. "1s", "500ms")
    #[arg(long, default_value = "1s")]
    interval: String,

    /// Metric name prefix
    #[arg(long, env = "VRT_METRIC_PREFIX", default_value = "varnish.requests")]
    prefix: String,

    /// Static tag appended to every metric line, as "key=value" (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging on stderr; stdout carries the metric lines.
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("varnish_request_tracker={log_level}"))
        .with_writer(std::io::stderr)
        .init();

    color_eyre::install()?;

    let interval = humantime::parse_duration(&cli.interval)
        .map_err(|e| eyre::eyre!("Invalid interval '{}': {}", cli.interval, e))?;
    let config = Config::new(cli.log_command, cli.log_file, interval, cli.prefix, cli.tags)?;

    let registry = RequestRegistry::new();
    let reporter = StatsReporter::new(registry.clone(), Box::new(StdoutSink), config.prefix.as_str())
        .with_tags(config.tags.clone());
    let source = config.open_source()?;
    let mut manager = Manager::new(source, registry, reporter, config.interval);

    let stop = manager.stop_handle();
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])?;
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("signal received, shutting down");
            stop.stop();
        }
    });

    manager.run()?;
    info!("tracker stopped");
    Ok(())
}

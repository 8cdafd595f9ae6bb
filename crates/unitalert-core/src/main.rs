//! unitalert CLI
//!
//! Command-line entry point for the unit failure alerter.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use unitalert::collector::Collector;
use unitalert::config::{Config, SourceKind};
use unitalert::notifier::{LogNotifier, Notifier, NotifierRegistry, SlackConfig, SlackNotifier};
use unitalert::telemetry;

/// unitalert - alerts when service manager units fail
#[derive(Parser)]
#[command(name = "unitalert")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "UNITALERT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Where unit records come from
    #[arg(long, global = true, value_enum)]
    source: Option<SourceKind>,

    /// Input file for the file source
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run with the notifiers from the configuration file (default)
    Run,

    /// Send alerts to a single Slack webhook
    Slack {
        /// Incoming webhook URL
        #[arg(long, env = "UNITALERT_SLACK_WEBHOOK_URL")]
        webhook: String,

        /// Destination channel
        #[arg(long, env = "UNITALERT_SLACK_CHANNEL")]
        channel: String,

        /// Message text, `$VAR` references are expanded on send
        #[arg(long, env = "UNITALERT_SLACK_MESSAGE", default_value = "")]
        message: String,
    },

    /// Log alerts instead of sending them anywhere
    Debug {
        /// Flush interval
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        frequency: Duration,
    },

    /// Validate the configuration and print it as JSON
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = telemetry::init_tracing(&config.logging, cli.verbose) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    // Where the configuration came from
    match Config::resolve_path(cli.config.as_deref()) {
        Some(path) if path.exists() => info!(path = %path.display(), "Loaded configuration"),
        Some(path) => info!(path = %path.display(), "Configuration file not found, using defaults"),
        None => info!("No configuration directory, using defaults"),
    }

    // Execute command
    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Slack {
            webhook,
            channel,
            message,
        } => run_slack(config, webhook, channel, message).await,
        Commands::Debug { frequency } => run_debug(config, frequency).await,
        Commands::CheckConfig => check_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(input) = &cli.input {
        config.source.path = Some(input.clone());
        if cli.source.is_none() {
            config.source.kind = SourceKind::File;
        }
    }
    if let Some(kind) = cli.source {
        config.source.kind = kind;
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: Config) -> anyhow::Result<()> {
    let notifiers = NotifierRegistry::with_defaults().build_all(&config.notifications);
    start(config, notifiers).await
}

async fn run_slack(
    config: Config,
    webhook: String,
    channel: String,
    message: String,
) -> anyhow::Result<()> {
    let slack = SlackNotifier::new(SlackConfig {
        webhook,
        channel,
        message,
        icon_emoji: String::new(),
    })
    .context("failed to create Slack notifier")?;

    start(config, vec![Arc::new(slack)]).await
}

async fn run_debug(mut config: Config, frequency: Duration) -> anyhow::Result<()> {
    config.agent.frequency = frequency;
    start(config, vec![Arc::new(LogNotifier::new())]).await
}

async fn start(config: Config, notifiers: Vec<Arc<dyn Notifier>>) -> anyhow::Result<()> {
    if let Some(listen) = config.metrics.listen {
        telemetry::install_metrics_exporter(listen)?;
        info!(%listen, "Serving metrics");
    }

    let names: Vec<&str> = notifiers.iter().map(|n| n.name()).collect();
    info!(
        frequency = %humantime::format_duration(config.agent.frequency),
        notifiers = ?names,
        "Starting unitalert"
    );

    let collector = Collector::new(config, notifiers)?;
    collector.start().await?;
    Ok(())
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config).context("failed to serialize configuration")?;
    println!("{json}");
    Ok(())
}

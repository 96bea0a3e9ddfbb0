use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use shared_types::TargetId;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slot_watcher::config::{self, Settings};
use slot_watcher::expander;
use slot_watcher::report;
use slot_watcher::{CheckScheduler, CycleRunner, JsonFileStore, NtfyNotifier, RoutedSlotSource};

#[derive(Parser)]
#[command(name = "slot-watcher")]
#[command(about = "Watch padel court booking pages and push a notification when a slot opens up")]
#[command(
    long_about = "Periodically scrapes the configured booking pages for the weekdays and time \
    windows you care about, remembers what it has seen, and sends an ntfy push the moment a \
    slot becomes bookable.\n\n\
    Without a subcommand the watch loop runs until interrupted."
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watch loop until Ctrl+C or SIGTERM
    Run,

    /// Scrape once and print what is bookable, without notifying
    ///
    /// Exits with status 1 when every target failed.
    Check {
        /// Only check this target id
        #[arg(short, long)]
        target: Option<String>,

        /// Only check this date (YYYY-MM-DD)
        #[arg(short, long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and show today's query points
    Validate,

    /// Print a starter configuration file
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slot_watcher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cli.config).await,
        Commands::Check { target, date, json } => {
            let settings = config::load_settings(cli.config)?;
            let target = target.map(TargetId::new);
            if let Some(id) = &target {
                if !settings.registry.contains(id) {
                    anyhow::bail!("Unknown target '{}'", id);
                }
            }

            let source = RoutedSlotSource::from_scrapers(&settings.scrapers)?;
            let today = Local::now().date_naive();
            let report = report::run_check(&settings, &source, today, target.as_ref(), date).await;

            if json {
                println!("{}", report.to_json().context("Failed to serialize report")?);
            } else {
                print!("{}", report.render_text());
            }

            if report.all_failed() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Validate => {
            let settings = config::load_settings(cli.config)?;
            print_plan(&settings);
            Ok(())
        }
        Commands::Example => {
            let text = toml::to_string_pretty(&config::Config::example())
                .context("Failed to render example config")?;
            print!("{}", text);
            Ok(())
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting slot watcher");

    let settings = config::load_settings(config_path)?;
    tracing::info!(
        "{} target(s), {} watch(es), checking every {:?}",
        settings.registry.len(),
        settings.watches.len(),
        settings.interval
    );

    let store = JsonFileStore::open(&settings.state_path)
        .with_context(|| format!("Failed to open state store {}", settings.state_path.display()))?;
    let source = RoutedSlotSource::from_scrapers(&settings.scrapers)?;
    let notifier = NtfyNotifier::new(settings.ntfy.clone())?;
    tracing::info!("Sending notifications to {}", notifier.topic_url(notifier.topic()));

    let interval = settings.interval;
    let runner =
        CycleRunner::open(settings, Arc::new(source), Arc::new(store), Arc::new(notifier))?;
    let mut scheduler = CheckScheduler::new(runner, interval);

    tracing::info!("Slot watcher running. Press Ctrl+C to stop.");
    scheduler.run_until(shutdown_signal()).await;

    tracing::info!("Slot watcher stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, stopping...");
}

fn print_plan(settings: &Settings) {
    let today = Local::now().date_naive();
    let plan = expander::plan(&settings.watches, today);

    println!("Configuration OK");
    println!("  state file: {}", settings.state_path.display());
    println!("  ntfy topic: {}", settings.ntfy.topic);
    println!("  {} query point(s) for {}:", plan.len(), today);
    for point in plan.points() {
        let windows: Vec<String> =
            plan.windows_for(point).iter().map(ToString::to_string).collect();
        println!(
            "    {:<24} {} [{}]",
            settings.registry.name_of(&point.target),
            point.date.format("%a %Y-%m-%d"),
            windows.join(", ")
        );
    }
}

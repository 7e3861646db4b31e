//! Horawatch CLI
//!
//! Watches the Santiago driver's-license booking site for open appointment
//! slots: one interactive check, or unattended polling on an interval.
//!
//! Usage:
//!   horawatch check              # one check, decisions made interactively
//!   horawatch watch              # poll continuously at the configured interval
//!   horawatch --rut 18977386-2 --headless watch

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use horawatch::engines::chromium::ChromiumLauncher;
use horawatch::{Monitor, RunMode, Rut, WatchConfig};

mod prompt;
use prompt::{OperationKind, StdinPrompt};

#[derive(Parser)]
#[command(name = "horawatch")]
#[command(about = "🚗 Watch a government booking site for open appointment slots")]
#[command(version)]
struct Cli {
    /// Identifier (RUT) to check with; prompted interactively when omitted
    #[arg(long)]
    rut: Option<String>,

    /// Operation being narrated: crear (new booking) or modificar (move one)
    #[arg(long, value_enum)]
    operation: Option<OperationKind>,

    /// Override the target URL
    #[arg(long)]
    url: Option<String>,

    /// Minutes between checks in watch mode
    #[arg(long)]
    interval: Option<u64>,

    /// Run the browser without a visible window
    #[arg(long)]
    headless: bool,

    /// Directory for phase screenshots
    #[arg(long)]
    screenshot_dir: Option<PathBuf>,

    /// JSON file overriding the built-in site classification rules
    #[arg(long)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one availability check with interactive decisions
    Check,
    /// Poll continuously at the configured interval
    Watch,
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let log_dir = if let Ok(custom) = env::var("HORAWATCH_LOG_DIR") {
        PathBuf::from(custom)
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(env::temp_dir)
            .join("horawatch")
            .join("logs")
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("could not create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "horawatch.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}

fn apply_overrides(config: &mut WatchConfig, cli: &Cli) {
    if let Some(url) = &cli.url {
        config.target_url = url.clone();
    }
    if let Some(interval) = cli.interval {
        config.poll_interval_minutes = interval;
    }
    if cli.headless {
        config.headless = true;
    }
    if let Some(dir) = &cli.screenshot_dir {
        config.screenshot_dir = dir.clone();
    }
    if let Some(rules) = &cli.rules {
        config.rules_path = Some(rules.clone());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging().context("failed to set up logging")?;

    prompt::print_banner();

    let mut config = WatchConfig::from_env().context("invalid environment configuration")?;
    apply_overrides(&mut config, &cli);
    let rules = config.load_rules().context("could not load classification rules")?;

    let rut = match &cli.rut {
        Some(raw) => Rut::parse(raw).with_context(|| format!("invalid RUT {raw:?}"))?,
        None => prompt::ask_rut(&config.fallback_rut)?,
    };
    let operation = match cli.operation {
        Some(op) => op,
        None => prompt::ask_operation()?,
    };

    println!("\n📋 CONFIGURACIÓN:");
    println!("   • URL objetivo: {}", config.target_url);
    println!("   • Intervalo: {} minutos", config.poll_interval_minutes);
    println!("   • Navegador: {} (headless: {})", config.browser, config.headless);
    println!("   • RUT: {rut}");
    println!("   • Operación: {}", operation.describe());

    let mode = match cli.command {
        Some(Commands::Check) => RunMode::SingleCheck,
        Some(Commands::Watch) => RunMode::Continuous,
        None => prompt::ask_mode()?,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!();
                info!("🛑 interrupt received, finishing up");
                cancel.cancel();
            }
        });
    }

    info!("starting in {:?} mode as {rut} ({})", mode, operation.describe());

    let mut monitor = Monitor::new(
        config,
        rules,
        mode,
        rut,
        Arc::new(ChromiumLauncher),
        Arc::new(StdinPrompt),
        cancel,
    )
    .context("could not assemble the watcher")?;

    monitor.run().await.context("the watcher could not keep running")?;

    if let Some(outcome) = &monitor.state().last_outcome {
        prompt::print_final_outcome(outcome);
    }

    Ok(())
}

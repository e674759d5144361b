use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use modkit::{InventoryDiscovery, ModuleDiscovery};
use modkit_bootstrap::{AppConfig, CliArgs};

use std::path::PathBuf;

use modkit::runtime::{run, RunOptions};

mod registered_modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_BOOTSTRAP_MODULE: &str = "logger";

/// ModHost Server - supervised module host
#[derive(Parser)]
#[command(name = "modhost-server")]
#[command(about = "ModHost Server - loads, monitors and restarts pluggable modules")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Module loaded and started before all others (overrides config)
    #[arg(long)]
    bootstrap: Option<String>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host
    Run,
    /// Validate configuration and exit
    Check,
    /// Print the discovered modules and exit
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
        bootstrap_module: cli.bootstrap.clone(),
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);
    if config.supervisor.bootstrap_module.is_none() {
        config.supervisor.bootstrap_module = Some(DEFAULT_BOOTSTRAP_MODULE.to_string());
    }

    let logging_config = config.logging.clone().unwrap_or_default();
    modkit_bootstrap::logging::init_logging(&logging_config, &config.home_dir()?);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_host(config).await,
        Commands::Check => check_config(config),
        Commands::List => list_modules(),
    }
}

async fn run_host(config: AppConfig) -> Result<()> {
    tracing::info!(
        bootstrap = ?config.supervisor.bootstrap_module,
        interval = ?config.supervisor.monitor_interval,
        threshold = ?config.supervisor.stall_threshold,
        "ModHost Server starting"
    );
    run(RunOptions::new(config.supervisor)).await
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    config.validate()?;
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}

fn list_modules() -> Result<()> {
    for d in InventoryDiscovery.discover() {
        let deps = if d.deps.is_empty() {
            "-".to_string()
        } else {
            d.deps.join(", ")
        };
        println!("{:<16} {:<8} deps: {}", d.name, format!("{:?}", d.priority), deps);
    }
    Ok(())
}

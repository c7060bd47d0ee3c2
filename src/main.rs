use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use vigil::{
    MaintenanceEngine,
    config::{self, EngineConfig},
    observability,
};

/// CLI arguments for the vigil maintenance engine
#[derive(Parser, Debug)]
#[command(version, about = "vigil maintenance engine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./vigil.toml, then
    /// ~/.config/vigil/vigil.toml; built-in defaults if neither exists)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Serve,
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ~/.config/vigil/vigil.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Archive records older than the given age once and exit
    Cleanup {
        /// Minimum record age in days
        #[arg(long)]
        days: u32,
        /// Compact the store after archiving
        #[arg(long)]
        optimize: bool,
    },
    /// Print the engine status as JSON
    Status,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Init { output, force }) => run_init(output, force),
        Some(Command::CheckConfig) => run_check_config(args.config.as_deref()),
        Some(Command::Cleanup { days, optimize }) => {
            run_cleanup(args.config.as_deref(), days, optimize).await
        }
        Some(Command::Status) => run_status(args.config.as_deref()).await,
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

/// Resolve the config path. `None` means no file was found and the
/// built-in defaults apply.
fn resolve_config_path(explicit_path: Option<&str>) -> Result<Option<PathBuf>, String> {
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path));
    }

    let cwd_config = PathBuf::from("vigil.toml");
    if cwd_config.exists() {
        return Ok(Some(cwd_config));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        return Ok(Some(default_path));
    }

    Ok(None)
}

/// Load the configuration or exit with a message.
fn load_config(explicit_path: Option<&str>) -> (EngineConfig, Option<PathBuf>) {
    let config_path = match resolve_config_path(explicit_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let loaded = match &config_path {
        Some(path) => EngineConfig::from_file(path),
        None => {
            let config = EngineConfig::default();
            config.validate().map(|()| config)
        }
    };

    match loaded {
        Ok(config) => (config, config_path),
        Err(e) => {
            match &config_path {
                Some(path) => eprintln!("Failed to load config from {}: {}", path.display(), e),
                None => eprintln!("Invalid default configuration: {}", e),
            }
            std::process::exit(1);
        }
    }
}

/// Build the engine or exit with a message.
async fn build_engine(config: EngineConfig) -> MaintenanceEngine {
    match MaintenanceEngine::from_config(config).await {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start maintenance engine");
            eprintln!("Failed to start maintenance engine: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(config: &EngineConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }
}

/// Create a starter configuration file.
fn run_init(output: Option<String>, force: bool) {
    let output_path = output
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, config::EXAMPLE_CONFIG) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To start the engine, run:");
    println!("  vigil serve --config {}", output_path.display());
}

fn run_check_config(explicit_config_path: Option<&str>) {
    let (config, path) = load_config(explicit_config_path);
    let policy = match config.initial_policy() {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("Invalid policy: {}", e);
            std::process::exit(1);
        }
    };

    match path {
        Some(path) => println!("Configuration OK: {}", path.display()),
        None => println!("No config file found; built-in defaults are valid"),
    }
    println!(
        "retention_days={} batch_size={} disk_threshold_percent={}",
        policy.retention_days, policy.batch_size, policy.disk_threshold_percent
    );
}

async fn run_cleanup(explicit_config_path: Option<&str>, days: u32, optimize: bool) {
    let (config, _) = load_config(explicit_config_path);
    init_logging(&config);
    let engine = build_engine(config).await;

    let result = engine.trigger_cleanup(days, optimize).await;
    engine.shutdown().await;

    match result {
        Ok(archived) => println!("Archived {} records", archived),
        Err(e) => {
            eprintln!("Cleanup failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_status(explicit_config_path: Option<&str>) {
    let (config, _) = load_config(explicit_config_path);
    init_logging(&config);
    let engine = build_engine(config).await;

    // One sample so the report carries current disk usage. Sampling leaves
    // the breach latch alone.
    if let Err(e) = engine.context().monitor.sample().await {
        tracing::warn!(error = %e, "Disk sample failed");
    }
    let status = engine.get_status().await;
    engine.shutdown().await;

    match serde_json::to_string_pretty(&status) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize status: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config, config_path) = load_config(explicit_config_path);
    init_logging(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }

    match &config_path {
        Some(path) => tracing::info!(config_file = %path.display(), "Starting maintenance engine"),
        None => tracing::info!("Starting maintenance engine with built-in defaults"),
    }

    let engine = build_engine(config).await;
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    engine.run(shutdown).await;
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, waiting for running jobs to finish...");
}

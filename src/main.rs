//! RaveHub Bot - Main binary

use clap::{Parser, Subcommand};
use ravebot_core::{
    BridgeClient, CommandRegistry, Config, ConnectionManager, Dispatcher, FileSessionStore,
    JsonFileStore, Services, SystemClock, Termination,
};
use ravebot_modules::{default_middleware, register_commands};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// RaveHub Bot - WhatsApp group management
#[derive(Parser)]
#[command(name = "ravebot")]
#[command(about = "A WhatsApp group-management bot")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "ravebot.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "ravebot.toml")]
        output: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    if let Some(command) = cli.command {
        match command {
            Commands::Config { output } => {
                generate_config(&output)?;
                return Ok(());
            }
            Commands::Version => {
                show_version();
                return Ok(());
            }
        }
    }

    let config = if cli.config.exists() {
        info!("Loading configuration from {:?}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        info!("Configuration file not found, using defaults");
        Config::default()
    };

    config.validate()?;
    if cli.test_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let termination = run(config).await?;
    info!("Bot stopped: {}", termination);
    std::process::exit(termination.exit_code());
}

/// Wire the services together and drive the connection until it terminates
async fn run(config: Config) -> anyhow::Result<Termination> {
    let store = Arc::new(JsonFileStore::open(&config.persistence.path).await?);
    info!("Persistence ready at {:?}", store.path());

    let grace = Duration::from_secs(config.shutdown.grace_period_seconds);
    let cache_sweep = Duration::from_secs(config.cache.sweep_interval_seconds);
    let client = Arc::new(BridgeClient::new(
        config.bridge.address.clone(),
        config.bridge.request_timeout(),
    ));
    let session = Arc::new(FileSessionStore::new(config.session.directory.clone()));

    let services = Arc::new(Services::new(config, store, Arc::new(SystemClock)));

    let mut registry = CommandRegistry::new();
    register_commands(&mut registry)?;

    let mut dispatcher = Dispatcher::new(client.clone(), Arc::clone(&services), Arc::new(registry));
    for middleware in default_middleware()? {
        dispatcher = dispatcher.with_middleware(middleware);
    }

    let shutdown = CancellationToken::new();
    services.metadata.start_sweep_task(cache_sweep, shutdown.child_token());
    services.rate_limiter.start_cleanup_task(shutdown.child_token());
    tokio::spawn(listen_for_signals(shutdown.clone()));

    info!(
        "Starting {} (bridge {})",
        services.config.bot.name,
        client.address()
    );
    let mut manager = ConnectionManager::new(client.clone(), Arc::new(dispatcher), session);
    let handlers = manager.handlers();
    let termination = manager.run(shutdown.clone()).await;
    shutdown.cancel();

    // Let handlers already running finish, within the grace period
    handlers.close();
    if !handlers.is_empty() {
        info!("Waiting up to {:?} for {} in-flight handlers", grace, handlers.len());
    }
    if tokio::time::timeout(grace, handlers.wait()).await.is_err() {
        warn!(
            "Grace period of {:?} elapsed with {} handlers still running, forcing exit",
            grace,
            handlers.len()
        );
    }

    client.disconnect();
    Ok(termination)
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn listen_for_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT, shutting down");
                }
                shutdown.cancel();
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
            _ = shutdown.cancelled() => return,
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
            _ = shutdown.cancelled() => return,
        }
    }

    shutdown.cancel();
}

/// Initialize logging
fn init_logging(level: &str) {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .init();
}

/// Generate default configuration file
fn generate_config(output: &PathBuf) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Show version information
fn show_version() {
    println!("ravebot {}", env!("CARGO_PKG_VERSION"));
    println!("{}", env!("CARGO_PKG_DESCRIPTION"));
}

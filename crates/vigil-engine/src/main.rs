//! Host binary for the Vigil intervention engine.
//!
//! Runs the monitor loop in the foreground until interrupted, logging each
//! intervention event as it is recorded.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `vigil-config.yaml` (or `$VIGIL_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Create the engine controller
//! 4. Start the monitor loop
//! 5. Wait for Ctrl-C
//! 6. Stop the loop and log the final status

mod error;

use std::path::{Path, PathBuf};

use tracing::info;
use tracing_subscriber::EnvFilter;
use vigil_core::EngineController;
use vigil_core::config::{EngineConfig, LoggingConfig};

use crate::error::HostError;

/// Environment variable overriding the configuration file path.
const CONFIG_ENV: &str = "VIGIL_CONFIG";

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "vigil-config.yaml";

/// Application entry point for the Vigil engine.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the engine fails to
/// start or stop.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging depends on it, so report afterwards.
    let path = config_path();
    let loaded = load_config(&path)?;

    // 2. Initialize structured logging.
    let logging = loaded
        .as_ref()
        .map_or_else(LoggingConfig::default, |c| c.logging.clone());
    init_logging(&logging);

    info!("vigil-engine starting");
    let config = loaded.unwrap_or_else(|| {
        info!(path = %path.display(), "Config file not found, using defaults");
        EngineConfig::default()
    });
    info!(
        targets = config.targets.len(),
        poll_interval_seconds = config.poll_interval_seconds,
        max_events = config.max_events,
        style_rules = config.style_rules.len(),
        "Configuration loaded"
    );

    run(config).await?;
    Ok(())
}

/// Start the engine, wait for Ctrl-C, and stop it.
async fn run(config: EngineConfig) -> Result<(), HostError> {
    // 3. Create the controller.
    let engine = EngineController::new(config)?;

    // 4. Start the loop.
    engine.start().await?;
    info!("Monitoring; press Ctrl-C to stop");

    // 5. Wait for the shutdown signal.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    // 6. Stop and report.
    engine.stop().await?;
    let status = engine.status().await;
    info!(
        ticks = status.state.tick_count,
        events = status.event_count,
        report = %serde_json::to_string(&status)?,
        "vigil-engine stopped"
    );
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load configuration from `path`, or `None` if the file does not exist.
fn load_config(path: &Path) -> Result<Option<EngineConfig>, HostError> {
    if path.exists() {
        Ok(Some(EngineConfig::from_file(path)?))
    } else {
        Ok(None)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

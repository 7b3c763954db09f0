//! # Hearth Home Service - Main Entry Point
//!
//! Standalone service hosting the player home registry with write-behind
//! SQLite persistence. This entry point handles CLI parsing, configuration
//! loading, and application lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! hearth
//!
//! # Specify custom configuration
//! hearth --config production.toml
//!
//! # Override specific settings
//! hearth --database /var/lib/hearth/homes.db --log-level debug
//!
//! # JSON logging for production
//! hearth --json-logs
//! ```
//!
//! ## Configuration
//!
//! The service loads configuration from a TOML file (default:
//! `hearth.toml`). If the file doesn't exist, a default configuration will
//! be created.
//!
//! ## Signal Handling
//!
//! The service drains every write-behind queue before exiting on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the hearth service.
///
/// Handles the complete application lifecycle including:
/// 1. Command-line argument parsing
/// 2. Configuration loading and validation
/// 3. Logging system initialization
/// 4. Application creation and execution
/// 5. Error handling and cleanup
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{LoggingSettings, StorageSettings};

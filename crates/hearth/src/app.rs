//! Main application logic and lifecycle management.
//!
//! Contains the `Application` struct that orchestrates service startup,
//! monitoring, and graceful shutdown of the home registry.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use hearth_registry::{HomeRegistry, RegistryError};
use hearth_store_sqlite::SqliteHomeStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main application struct.
///
/// Manages the complete lifecycle of the hearth service: configuration
/// loading, database setup, registry construction, health monitoring, and
/// graceful shutdown handling.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// The home registry instance
    registry: Arc<HomeRegistry>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// Loads configuration, applies CLI overrides, validates settings, and
    /// brings up the SQLite store and registry.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Open and migrate the home database
    /// 6. Construct the registry with its background tasks
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(database_path) = args.database_path {
            config.storage.database_path = database_path.to_string_lossy().to_string();
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let store = SqliteHomeStore::open(
            &config.storage.database_path,
            config.storage.pool_size,
            config.registry.pool_acquire_timeout(),
        )
        .await?;
        let registry = Arc::new(HomeRegistry::new(Arc::new(store), config.registry.clone()));

        info!(
            "📂 Config: {} | Database: {}",
            args.config_path.display(),
            config.storage.database_path
        );

        Ok(Self { config, registry })
    }

    /// The registry this application serves.
    pub fn registry(&self) -> Arc<HomeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Runs the application until a shutdown signal arrives.
    ///
    /// # Monitoring Features
    ///
    /// * **Configuration Summary**: Displays key settings at startup
    /// * **Periodic Health Reports**: Loaded owners and queue depth every
    ///   60 seconds
    /// * **Graceful Shutdown**: Drains every write-behind queue before exit
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Hearth Home Service");
        self.log_configuration_summary();

        // Start monitoring task for real-time statistics
        let monitoring_handle = {
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
                loop {
                    interval.tick().await;
                    info!(
                        "📊 Registry Health - {} owners loaded | {} writes pending",
                        registry.loaded_owner_count(),
                        registry.pending_writes()
                    );
                }
            })
        };

        info!("✅ Hearth service is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // Wait for shutdown signal
        setup_signal_handlers().await?;

        // A second signal skips the drain entirely
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up second-signal handler: {e}");
                return;
            }
            warn!("Shutdown signal received again! Exiting immediately.");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        monitoring_handle.abort();

        match self.registry.shutdown().await {
            Ok(()) => {
                info!("💾 All pending home writes persisted");
            }
            Err(RegistryError::ShutdownIncomplete { pending, timeout }) => {
                error!(
                    "⚠️ {} home writes still unpersisted after {:?} - data may be lost",
                    pending, timeout
                );
            }
            Err(e) => {
                error!("Shutdown drain failed: {}", e);
            }
        }

        info!("👋 Hearth service shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("⚙️ Configuration Summary:");
        info!("  - Database: {}", self.config.storage.database_path);
        info!(
            "  - Pool: {} connections, {:?} acquire timeout",
            self.config.storage.pool_size,
            self.config.registry.pool_acquire_timeout()
        );
        info!(
            "  - Homes per player: {}",
            self.config.registry.homes_per_player_cap
        );
        info!(
            "  - Flush: every {:?} or at {} pending ops",
            self.config.registry.flush_interval(),
            self.config.registry.queue_depth_flush_threshold
        );
        info!(
            "  - Idle eviction after {:?}",
            self.config.registry.idle_eviction()
        );
    }
}

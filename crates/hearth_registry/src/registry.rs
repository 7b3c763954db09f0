//! The home registry facade.
//!
//! This is the surface command handlers talk to. Reads and mutations are
//! synchronous memory operations backed by the cache, with persistence
//! handled behind the scenes by the write-behind queue; only the lifecycle
//! entry points (join, quit, shutdown) are async.

use crate::cache::HomeCache;
use crate::config::RegistryConfig;
use crate::cooldown::CooldownTracker;
use crate::error::{RegistryError, StoreError};
use crate::lifecycle::LifecycleManager;
use crate::queue::WriteBehindQueue;
use crate::shutdown::ShutdownState;
use crate::store::{HomeStore, PendingOp};
use crate::types::{Home, Location, OwnerId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Maximum characters in a home name.
pub const MAX_NAME_LEN: usize = 16;

/// Provides the per-owner home cap.
///
/// The default implementation applies the configured cap uniformly; servers
/// with rank-based limits inject their own provider.
pub trait HomeLimits: Send + Sync {
    /// The owner's maximum home count. `None` means unlimited.
    fn cap_for(&self, owner: OwnerId) -> Option<u32>;
}

/// A uniform cap for every owner.
#[derive(Debug, Clone, Copy)]
pub struct FixedLimits {
    cap: Option<u32>,
}

impl FixedLimits {
    pub fn new(cap: Option<u32>) -> Self {
        Self { cap }
    }
}

impl HomeLimits for FixedLimits {
    fn cap_for(&self, _owner: OwnerId) -> Option<u32> {
        self.cap
    }
}

/// Validates a home name: 1 to 16 characters, ASCII letters, digits and
/// underscores only.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    let valid = (1..=MAX_NAME_LEN).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

/// One teleport to be recorded for visit statistics.
struct VisitEvent {
    owner: OwnerId,
    key: String,
}

/// The player home registry.
///
/// Owns the cache, write-behind queue, lifecycle manager, cooldown tracker
/// and the background tasks that drive them. Cheap to share behind an
/// `Arc`; all methods take `&self`.
pub struct HomeRegistry {
    cache: Arc<HomeCache>,
    queue: WriteBehindQueue,
    lifecycle: Arc<LifecycleManager>,
    cooldowns: CooldownTracker,
    limits: Arc<dyn HomeLimits>,
    shutdown: ShutdownState,
    visits: mpsc::Sender<VisitEvent>,
    config: RegistryConfig,
}

impl HomeRegistry {
    /// Builds a registry with the uniform cap from `config`.
    ///
    /// Must be called from within a tokio runtime; spawns the flusher, the
    /// idle sweeper and the visit statistics worker.
    pub fn new(store: Arc<dyn HomeStore>, config: RegistryConfig) -> Self {
        let limits = Arc::new(FixedLimits::new(Some(config.homes_per_player_cap)));
        Self::with_limits(store, config, limits)
    }

    /// Builds a registry with a custom per-owner limits provider.
    pub fn with_limits(
        store: Arc<dyn HomeStore>,
        config: RegistryConfig,
        limits: Arc<dyn HomeLimits>,
    ) -> Self {
        let cache = Arc::new(HomeCache::new());
        let queue = WriteBehindQueue::spawn(Arc::clone(&store), &config);
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&cache),
            queue.clone(),
            Arc::clone(&store),
            config.clone(),
        ));
        let shutdown = ShutdownState::new();
        lifecycle.spawn_idle_sweeper(shutdown.clone());

        let (visits, visit_rx) = mpsc::channel(256);
        tokio::spawn(run_visit_recorder(store, visit_rx));

        info!(
            "🏠 Home registry started (cap {}, flush every {:?})",
            config.homes_per_player_cap,
            config.flush_interval()
        );

        Self {
            cache,
            queue,
            lifecycle,
            cooldowns: CooldownTracker::new(config.teleport_cooldown()),
            limits,
            shutdown,
            visits,
            config,
        }
    }

    /// Loads the owner's homes into memory, typically on join.
    ///
    /// Concurrent calls for the same owner share one store read.
    pub async fn handle_join(&self, owner: OwnerId) -> Result<(), RegistryError> {
        if self.shutdown.is_shutdown_initiated() {
            return Err(RegistryError::ShuttingDown);
        }
        self.lifecycle.ensure_loaded(owner).await
    }

    /// Flushes and evicts the owner's homes, typically on quit.
    pub async fn handle_quit(&self, owner: OwnerId) -> Result<(), RegistryError> {
        self.cooldowns.clear(owner);
        self.lifecycle.drain(owner).await
    }

    /// Loads an owner's homes for an offline or cross-player lookup.
    ///
    /// Same semantics as [`handle_join`](Self::handle_join); the loaded set
    /// is subject to idle eviction like any other.
    pub async fn load_owner(&self, owner: OwnerId) -> Result<(), RegistryError> {
        self.handle_join(owner).await
    }

    /// Forces a flush of every owner's pending writes to the store.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.queue.flush_all().await
    }

    /// Creates or replaces a home at the given location.
    ///
    /// The write is visible to readers immediately; persistence follows
    /// asynchronously. Returns the replaced home when the name (compared
    /// case-insensitively) already existed.
    pub fn set_home(
        &self,
        owner: OwnerId,
        name: &str,
        location: Location,
    ) -> Result<Option<Home>, RegistryError> {
        if self.shutdown.is_shutdown_initiated() {
            return Err(RegistryError::ShuttingDown);
        }
        validate_name(name)?;

        let home = Home::new(name, location);
        let replaced = self
            .cache
            .put(owner, home.clone(), self.limits.cap_for(owner))?;
        self.queue.enqueue(PendingOp::Upsert { owner, home });
        self.lifecycle.touch(owner);
        debug!(
            "Set home '{}' for owner {} ({})",
            name,
            owner,
            if replaced.is_some() { "replaced" } else { "new" }
        );
        Ok(replaced)
    }

    /// Deletes a home by name, returning the removed value.
    pub fn delete_home(&self, owner: OwnerId, name: &str) -> Result<Home, RegistryError> {
        if self.shutdown.is_shutdown_initiated() {
            return Err(RegistryError::ShuttingDown);
        }
        let key = name.to_lowercase();
        let removed = self.cache.remove(owner, &key)?;
        self.queue.enqueue(PendingOp::Delete { owner, key });
        self.lifecycle.touch(owner);
        debug!("Deleted home '{}' for owner {}", name, owner);
        Ok(removed)
    }

    /// Looks up a home by name. Memory only, never blocks.
    pub fn home(&self, owner: OwnerId, name: &str) -> Result<Home, RegistryError> {
        if !self.cache.is_loaded(owner) {
            return Err(RegistryError::NotLoaded(owner));
        }
        self.lifecycle.touch(owner);
        self.cache
            .get(owner, &name.to_lowercase())
            .ok_or_else(|| RegistryError::NotFound {
                owner,
                name: name.to_string(),
            })
    }

    /// Resolves a home for teleporting, enforcing the cooldown and
    /// recording the visit.
    ///
    /// The cooldown only starts once the home is known to exist, so a typo
    /// never burns the window. Visit recording is best-effort: a full
    /// statistics queue drops the event rather than slow the caller.
    pub fn teleport_target(&self, owner: OwnerId, name: &str) -> Result<Home, RegistryError> {
        let home = self.home(owner, name)?;
        self.cooldowns.check_and_touch(owner)?;
        if self
            .visits
            .try_send(VisitEvent {
                owner,
                key: home.key(),
            })
            .is_err()
        {
            debug!("Visit statistics queue full, dropping event");
        }
        Ok(home)
    }

    /// All homes for the owner in case-insensitive name order.
    pub fn list_homes(&self, owner: OwnerId) -> Result<Vec<Home>, RegistryError> {
        if !self.cache.is_loaded(owner) {
            return Err(RegistryError::NotLoaded(owner));
        }
        self.lifecycle.touch(owner);
        Ok(self.cache.list(owner))
    }

    /// Number of homes the owner currently has (0 when unloaded).
    pub fn home_count(&self, owner: OwnerId) -> usize {
        self.cache.home_count(owner)
    }

    /// Whether the owner's home set is resident in memory.
    pub fn is_loaded(&self, owner: OwnerId) -> bool {
        self.cache.is_loaded(owner)
    }

    /// Owners currently resident in the cache.
    pub fn loaded_owner_count(&self) -> usize {
        self.cache.loaded_owner_count()
    }

    /// Queued plus in-flight write operations across all owners.
    pub fn pending_writes(&self) -> usize {
        self.queue.total_pending()
    }

    /// Stops accepting mutations and drains every queue to the store.
    ///
    /// Flushes repeatedly until nothing is pending or the configured
    /// timeout elapses. On timeout the count of unpersisted operations is
    /// reported; they are lost when the process exits.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        self.shutdown.initiate_shutdown();
        let timeout = self.config.shutdown_flush_timeout();

        let drain = async {
            loop {
                let _ = self.queue.flush_all().await;
                if self.queue.total_pending() == 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        };

        let result = match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                info!("Final flush complete, all home writes persisted");
                Ok(())
            }
            Err(_) => {
                let pending = self.queue.total_pending();
                warn!(
                    "Shutdown drain timed out with {} operations unpersisted",
                    pending
                );
                Err(RegistryError::ShutdownIncomplete { pending, timeout })
            }
        };
        self.shutdown.complete_shutdown();
        result
    }
}

/// Visit statistics worker: applies teleport events to the store one at a
/// time, logging and dropping on failure.
async fn run_visit_recorder(store: Arc<dyn HomeStore>, mut rx: mpsc::Receiver<VisitEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = store.record_teleport(event.owner, &event.key).await {
            warn!(
                "Failed to record visit to '{}' for owner {}: {}",
                event.key, event.owner, e
            );
        }
    }
    debug!("Visit recorder stopping");
}

//! Owner load/evict lifecycle.
//!
//! Tracks each owner through `Unloaded -> Loading -> Loaded -> Draining ->
//! Unloaded`. Loads are coalesced: concurrent requests for the same owner
//! share one store read, with every waiter receiving the same outcome.
//! Eviction is always flush-then-evict, so the durable store has caught up
//! before the cached set is dropped. An idle sweeper drains owners that
//! have seen no activity for the configured window.

use crate::cache::HomeCache;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, StoreError};
use crate::queue::WriteBehindQueue;
use crate::shutdown::ShutdownState;
use crate::store::HomeStore;
use crate::types::OwnerId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Where one owner stands in the load/evict lifecycle.
///
/// Absence from the state map means `Unloaded`.
#[derive(Debug)]
enum OwnerState {
    /// A store read is in flight; waiters share its outcome.
    Loading {
        waiters: Vec<oneshot::Sender<Result<(), StoreError>>>,
    },
    /// The home set is resident and serving reads and writes.
    Loaded { last_activity: Instant },
    /// Flush-then-evict is in progress; waiters are told when it settles.
    Draining { waiters: Vec<oneshot::Sender<()>> },
}

enum LoadAction {
    Ready,
    Perform,
    AwaitLoad(oneshot::Receiver<Result<(), StoreError>>),
    AwaitDrain(oneshot::Receiver<()>),
}

enum DrainAction {
    Idle,
    Perform,
    AwaitLoad(oneshot::Receiver<Result<(), StoreError>>),
    AwaitDrain(oneshot::Receiver<()>),
}

/// Drives owner loads and evictions against the cache and queue.
pub struct LifecycleManager {
    states: DashMap<OwnerId, OwnerState>,
    cache: Arc<HomeCache>,
    queue: WriteBehindQueue,
    store: Arc<dyn HomeStore>,
    config: RegistryConfig,
}

impl LifecycleManager {
    pub fn new(
        cache: Arc<HomeCache>,
        queue: WriteBehindQueue,
        store: Arc<dyn HomeStore>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            states: DashMap::new(),
            cache,
            queue,
            store,
            config,
        }
    }

    /// Whether the owner is currently in the `Loaded` state.
    pub fn is_loaded(&self, owner: OwnerId) -> bool {
        matches!(
            self.states.get(&owner).as_deref(),
            Some(OwnerState::Loaded { .. })
        )
    }

    /// Records activity for a loaded owner, resetting its idle clock.
    pub fn touch(&self, owner: OwnerId) {
        if let Some(mut state) = self.states.get_mut(&owner) {
            if let OwnerState::Loaded { last_activity } = &mut *state {
                *last_activity = Instant::now();
            }
        }
    }

    /// Brings the owner's home set into memory, coalescing with any load
    /// already in flight.
    ///
    /// Returns once the owner is `Loaded`. If the owner is mid-drain (for
    /// example rejoining right after quitting), the drain completes first
    /// and a fresh load follows, so no flushed-but-stale data is served.
    pub async fn ensure_loaded(&self, owner: OwnerId) -> Result<(), RegistryError> {
        loop {
            let action = match self.states.entry(owner) {
                Entry::Vacant(vacant) => {
                    vacant.insert(OwnerState::Loading {
                        waiters: Vec::new(),
                    });
                    LoadAction::Perform
                }
                Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    OwnerState::Loaded { last_activity } => {
                        *last_activity = Instant::now();
                        LoadAction::Ready
                    }
                    OwnerState::Loading { waiters } => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        LoadAction::AwaitLoad(rx)
                    }
                    OwnerState::Draining { waiters } => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        LoadAction::AwaitDrain(rx)
                    }
                },
            };

            match action {
                LoadAction::Ready => return Ok(()),
                LoadAction::Perform => return self.perform_load(owner).await,
                LoadAction::AwaitLoad(rx) => match rx.await {
                    Ok(Ok(())) => return Ok(()),
                    Ok(Err(e)) => return Err(e.into()),
                    // Loader vanished without reporting; re-check the state.
                    Err(_) => continue,
                },
                LoadAction::AwaitDrain(rx) => {
                    let _ = rx.await;
                    continue;
                }
            }
        }
    }

    /// Flushes the owner's pending writes and evicts the cached set.
    ///
    /// Quitting mid-load waits for the load to land first, then drains, so
    /// the state machine never skips a step. A drain already in progress is
    /// awaited rather than duplicated. Unloaded owners are a no-op.
    pub async fn drain(&self, owner: OwnerId) -> Result<(), RegistryError> {
        loop {
            let action = match self.states.entry(owner) {
                Entry::Vacant(_) => DrainAction::Idle,
                Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    OwnerState::Loaded { .. } => {
                        occupied.insert(OwnerState::Draining {
                            waiters: Vec::new(),
                        });
                        DrainAction::Perform
                    }
                    OwnerState::Loading { waiters } => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        DrainAction::AwaitLoad(rx)
                    }
                    OwnerState::Draining { waiters } => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        DrainAction::AwaitDrain(rx)
                    }
                },
            };

            match action {
                DrainAction::Idle => return Ok(()),
                DrainAction::Perform => return self.perform_drain(owner).await,
                DrainAction::AwaitLoad(rx) => {
                    // Land the load, then come back around and drain.
                    let _ = rx.await;
                    continue;
                }
                DrainAction::AwaitDrain(rx) => {
                    let _ = rx.await;
                    return Ok(());
                }
            }
        }
    }

    /// Owners in `Loaded` state with no activity for at least `ttl`.
    fn idle_owners(&self) -> Vec<OwnerId> {
        let ttl = self.config.idle_eviction();
        self.states
            .iter()
            .filter(|entry| {
                matches!(
                    entry.value(),
                    OwnerState::Loaded { last_activity } if last_activity.elapsed() >= ttl
                )
            })
            .map(|entry| *entry.key())
            .collect()
    }

    /// Spawns the idle eviction sweeper.
    ///
    /// Runs until shutdown is initiated; the final shutdown drain takes
    /// over from there.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        shutdown: ShutdownState,
    ) -> tokio::task::JoinHandle<()> {
        let lifecycle = Arc::clone(self);
        let period = (lifecycle.config.idle_eviction() / 4)
            .max(std::time::Duration::from_millis(25));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if shutdown.is_shutdown_initiated() {
                    debug!("Idle sweeper stopping for shutdown");
                    break;
                }
                for owner in lifecycle.idle_owners() {
                    info!("Evicting idle owner {}", owner);
                    if let Err(e) = lifecycle.drain(owner).await {
                        warn!("Idle eviction for owner {} deferred: {}", owner, e);
                    }
                }
            }
        })
    }

    async fn perform_load(&self, owner: OwnerId) -> Result<(), RegistryError> {
        match self.load_with_retry(owner).await {
            Ok(homes) => {
                debug!("Loaded {} homes for owner {}", homes.len(), owner);
                self.cache.install(owner, homes);
                let mut waiters = Vec::new();
                if let Some(mut state) = self.states.get_mut(&owner) {
                    let loaded = OwnerState::Loaded {
                        last_activity: Instant::now(),
                    };
                    if let OwnerState::Loading { waiters: pending } =
                        std::mem::replace(&mut *state, loaded)
                    {
                        waiters = pending;
                    }
                }
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to load homes for owner {}: {}", owner, e);
                let waiters = match self.states.remove(&owner) {
                    Some((_, OwnerState::Loading { waiters })) => waiters,
                    _ => Vec::new(),
                };
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
                Err(e.into())
            }
        }
    }

    /// Reads the owner's homes with the same bounded backoff the flusher
    /// uses for writes.
    async fn load_with_retry(&self, owner: OwnerId) -> Result<Vec<crate::types::Home>, StoreError> {
        let max_attempts = self.config.flush_retry_max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.store.load_owner_homes(owner).await {
                Ok(homes) => return Ok(homes),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts || !e.is_transient() {
                        return Err(e);
                    }
                    let backoff = self.config.retry_backoff(attempt - 1);
                    warn!(
                        "Load attempt {}/{} for owner {} failed ({}), retrying in {:?}",
                        attempt, max_attempts, owner, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn perform_drain(&self, owner: OwnerId) -> Result<(), RegistryError> {
        match self.queue.flush_owner(owner).await {
            Ok(()) => {
                self.queue.wait_drained(owner).await;
                self.cache.evict(owner);
                let waiters = match self.states.remove(&owner) {
                    Some((_, OwnerState::Draining { waiters })) => waiters,
                    _ => Vec::new(),
                };
                for waiter in waiters {
                    let _ = waiter.send(());
                }
                debug!("Drained and evicted owner {}", owner);
                Ok(())
            }
            Err(e) => {
                // Memory stays authoritative; the set remains resident and
                // the sweeper retries the drain once the store recovers.
                error!(
                    "Drain flush for owner {} failed, keeping set resident: {}",
                    owner, e
                );
                let mut waiters = Vec::new();
                if let Some(mut state) = self.states.get_mut(&owner) {
                    let loaded = OwnerState::Loaded {
                        last_activity: Instant::now(),
                    };
                    if let OwnerState::Draining { waiters: pending } =
                        std::mem::replace(&mut *state, loaded)
                    {
                        waiters = pending;
                    }
                }
                for waiter in waiters {
                    let _ = waiter.send(());
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, MockStore};
    use crate::types::{Home, Location};
    use std::time::Duration;

    fn setup(store: Arc<MockStore>, config: &RegistryConfig) -> Arc<LifecycleManager> {
        let cache = Arc::new(HomeCache::new());
        let queue = WriteBehindQueue::spawn(store.clone(), config);
        Arc::new(LifecycleManager::new(cache, queue, store, config.clone()))
    }

    fn home(name: &str) -> Home {
        Home::new(name, Location::new("world", 0.0, 64.0, 0.0))
    }

    #[tokio::test]
    async fn load_installs_durable_homes() {
        let store = MockStore::new();
        let owner = OwnerId::new();
        store.seed(owner, vec![home("base"), home("farm")]);

        let lifecycle = setup(store, &test_config());
        lifecycle.ensure_loaded(owner).await.unwrap();

        assert!(lifecycle.is_loaded(owner));
        assert_eq!(lifecycle.cache.home_count(owner), 2);
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_store_read() {
        let store = MockStore::new();
        let owner = OwnerId::new();
        store.seed(owner, vec![home("base")]);
        store.set_load_delay(Duration::from_millis(50));

        let lifecycle = setup(store.clone(), &test_config());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(async move { lifecycle.ensure_loaded(owner).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.load_calls(), 1);
        assert!(lifecycle.is_loaded(owner));
    }

    #[tokio::test]
    async fn load_failure_reaches_every_waiter_and_leaves_unloaded() {
        let store = MockStore::new();
        let owner = OwnerId::new();
        let mut config = test_config();
        config.flush_retry_max_attempts = 1;
        store.set_load_delay(Duration::from_millis(50));
        store.fail_next_loads(1);

        let lifecycle = setup(store.clone(), &config);
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(async move { lifecycle.ensure_loaded(owner).await })
            })
            .collect();
        for task in tasks {
            let result = task.await.unwrap();
            assert!(matches!(result, Err(RegistryError::Store(_))));
        }

        assert!(!lifecycle.is_loaded(owner));
        assert!(!lifecycle.cache.is_loaded(owner));

        // Recovery: the next request loads cleanly.
        lifecycle.ensure_loaded(owner).await.unwrap();
        assert!(lifecycle.is_loaded(owner));
    }

    #[tokio::test]
    async fn drain_flushes_pending_writes_then_evicts() {
        let store = MockStore::new();
        let owner = OwnerId::new();
        let lifecycle = setup(store.clone(), &test_config());

        lifecycle.ensure_loaded(owner).await.unwrap();
        for name in ["base", "farm"] {
            lifecycle.cache.put(owner, home(name), Some(3)).unwrap();
            lifecycle.queue.enqueue(crate::store::PendingOp::Upsert {
                owner,
                home: home(name),
            });
        }
        assert_eq!(lifecycle.queue.pending_for(owner), 2);

        lifecycle.drain(owner).await.unwrap();

        assert!(!lifecycle.is_loaded(owner));
        assert!(!lifecycle.cache.is_loaded(owner));
        assert_eq!(store.durable_homes(owner).len(), 2);
        assert_eq!(lifecycle.queue.pending_for(owner), 0);
    }

    #[tokio::test]
    async fn concurrent_drains_do_not_double_flush() {
        let store = MockStore::new();
        let owner = OwnerId::new();
        let lifecycle = setup(store.clone(), &test_config());

        lifecycle.ensure_loaded(owner).await.unwrap();
        lifecycle.cache.put(owner, home("base"), Some(3)).unwrap();
        lifecycle.queue.enqueue(crate::store::PendingOp::Upsert {
            owner,
            home: home("base"),
        });

        let second = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.drain(owner).await })
        };
        lifecycle.drain(owner).await.unwrap();
        second.await.unwrap().unwrap();

        assert!(!lifecycle.is_loaded(owner));
        assert_eq!(store.applied_batches().len(), 1);
    }

    #[tokio::test]
    async fn drain_of_unloaded_owner_is_a_no_op() {
        let store = MockStore::new();
        let lifecycle = setup(store, &test_config());
        lifecycle.drain(OwnerId::new()).await.unwrap();
    }

    #[tokio::test]
    async fn quit_during_load_lands_then_evicts() {
        let store = MockStore::new();
        let owner = OwnerId::new();
        store.seed(owner, vec![home("base")]);
        store.set_load_delay(Duration::from_millis(50));

        let lifecycle = setup(store.clone(), &test_config());
        let loader = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.ensure_loaded(owner).await })
        };
        // Give the load a moment to enter flight, then quit.
        tokio::time::sleep(Duration::from_millis(10)).await;
        lifecycle.drain(owner).await.unwrap();

        loader.await.unwrap().unwrap();
        assert!(!lifecycle.is_loaded(owner));
        assert_eq!(store.load_calls(), 1);
    }

    #[tokio::test]
    async fn rejoin_during_drain_reloads_fresh_state() {
        let store = MockStore::new();
        let owner = OwnerId::new();
        store.seed(owner, vec![home("base")]);

        let lifecycle = setup(store.clone(), &test_config());
        lifecycle.ensure_loaded(owner).await.unwrap();

        let drainer = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.drain(owner).await })
        };
        // Let the drain begin, then rejoin; the rejoin must wait it out and
        // end with the owner loaded again.
        tokio::time::sleep(Duration::from_millis(5)).await;
        lifecycle.ensure_loaded(owner).await.unwrap();

        drainer.await.unwrap().unwrap();
        assert!(lifecycle.is_loaded(owner));
        assert!(store.load_calls() >= 1);
    }

    #[tokio::test]
    async fn failed_drain_keeps_owner_resident() {
        let store = MockStore::new();
        let owner = OwnerId::new();
        let mut config = test_config();
        config.flush_retry_max_attempts = 1;

        let lifecycle = setup(store.clone(), &config);
        lifecycle.ensure_loaded(owner).await.unwrap();
        lifecycle
            .cache
            .put(owner, home("base"), Some(3))
            .unwrap();
        lifecycle.queue.enqueue(crate::store::PendingOp::Upsert {
            owner,
            home: home("base"),
        });

        store.fail_next_batches(1);
        let err = lifecycle.drain(owner).await.unwrap_err();
        assert!(matches!(err, RegistryError::Store(_)));

        // The unflushed write survives in memory and in the queue.
        assert!(lifecycle.is_loaded(owner));
        assert_eq!(lifecycle.queue.pending_for(owner), 1);

        // Store recovers; the retried drain completes.
        lifecycle.drain(owner).await.unwrap();
        assert!(!lifecycle.is_loaded(owner));
        assert_eq!(store.durable_homes(owner).len(), 1);
    }

    #[tokio::test]
    async fn idle_sweeper_evicts_inactive_owners() {
        let store = MockStore::new();
        let owner = OwnerId::new();
        store.seed(owner, vec![home("base")]);

        let mut config = test_config();
        config.idle_eviction_ms = 50;
        let lifecycle = setup(store, &config);
        let shutdown = ShutdownState::new();
        let sweeper = lifecycle.spawn_idle_sweeper(shutdown.clone());

        lifecycle.ensure_loaded(owner).await.unwrap();
        for _ in 0..100 {
            if !lifecycle.is_loaded(owner) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!lifecycle.is_loaded(owner));

        shutdown.initiate_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), sweeper).await;
    }
}

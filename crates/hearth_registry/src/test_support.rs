//! Shared test doubles for registry tests.

use crate::config::RegistryConfig;
use crate::error::StoreError;
use crate::store::{HomeStore, PendingOp};
use crate::types::{Home, OwnerId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A registry config tuned for fast tests: short timers, tiny backoff.
pub fn test_config() -> RegistryConfig {
    RegistryConfig {
        flush_interval_ms: 50,
        retry_backoff_base_ms: 1,
        idle_eviction_ms: 100,
        shutdown_flush_timeout_ms: 1_000,
        ..RegistryConfig::default()
    }
}

/// In-memory [`HomeStore`] with failure injection and call recording.
///
/// `apply_batch` is all-or-nothing by construction, matching the
/// transactional contract of real backends.
#[derive(Debug, Default)]
pub struct MockStore {
    homes: Mutex<HashMap<OwnerId, HashMap<String, Home>>>,
    batches: Mutex<Vec<Vec<PendingOp>>>,
    visits: Mutex<HashMap<(OwnerId, String), u64>>,
    fail_batches: AtomicU32,
    fail_loads: AtomicU32,
    apply_attempts: AtomicU32,
    load_calls: AtomicU32,
    load_delay_ms: AtomicU32,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-populates durable state for an owner.
    pub fn seed(&self, owner: OwnerId, homes: Vec<Home>) {
        let mut map = self.homes.lock().unwrap();
        let entry = map.entry(owner).or_default();
        for home in homes {
            entry.insert(home.key(), home);
        }
    }

    /// Durable homes for an owner, in key order.
    pub fn durable_homes(&self, owner: OwnerId) -> Vec<Home> {
        let map = self.homes.lock().unwrap();
        let mut homes: Vec<Home> = map
            .get(&owner)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default();
        homes.sort_by(|a, b| a.key().cmp(&b.key()));
        homes
    }

    /// Every successfully applied batch, in order.
    pub fn applied_batches(&self) -> Vec<Vec<PendingOp>> {
        self.batches.lock().unwrap().clone()
    }

    /// Total `apply_batch` calls, including failed attempts.
    pub fn apply_attempts(&self) -> u32 {
        self.apply_attempts.load(Ordering::SeqCst)
    }

    /// Total `load_owner_homes` calls, including failed ones.
    pub fn load_calls(&self) -> u32 {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Recorded visit count for `(owner, key)`.
    pub fn visit_count(&self, owner: OwnerId, key: &str) -> u64 {
        *self
            .visits
            .lock()
            .unwrap()
            .get(&(owner, key.to_string()))
            .unwrap_or(&0)
    }

    /// Makes the next `n` `apply_batch` calls fail with a transient error.
    pub fn fail_next_batches(&self, n: u32) {
        self.fail_batches.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` `load_owner_homes` calls fail.
    pub fn fail_next_loads(&self, n: u32) {
        self.fail_loads.store(n, Ordering::SeqCst);
    }

    /// Adds an artificial delay to every load, for racing load coalescing.
    pub fn set_load_delay(&self, delay: Duration) {
        self.load_delay_ms
            .store(delay.as_millis() as u32, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl HomeStore for MockStore {
    async fn load_owner_homes(&self, owner: OwnerId) -> Result<Vec<Home>, StoreError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if Self::take_failure(&self.fail_loads) {
            return Err(StoreError::Connection("injected load failure".into()));
        }
        let map = self.homes.lock().unwrap();
        Ok(map
            .get(&owner)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_batch(&self, batch: &[PendingOp]) -> Result<(), StoreError> {
        self.apply_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_batches) {
            return Err(StoreError::Connection("injected batch failure".into()));
        }
        let mut map = self.homes.lock().unwrap();
        for op in batch {
            match op {
                PendingOp::Upsert { owner, home } => {
                    map.entry(*owner).or_default().insert(home.key(), home.clone());
                }
                PendingOp::Delete { owner, key } => {
                    if let Some(set) = map.get_mut(owner) {
                        set.remove(key);
                    }
                }
            }
        }
        drop(map);
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    async fn record_teleport(&self, owner: OwnerId, key: &str) -> Result<(), StoreError> {
        *self
            .visits
            .lock()
            .unwrap()
            .entry((owner, key.to_string()))
            .or_insert(0) += 1;
        Ok(())
    }
}

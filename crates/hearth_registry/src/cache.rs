//! In-process home cache.
//!
//! The cache is the authoritative view of every loaded owner's homes. All
//! reads and writes are synchronous map operations that never touch I/O,
//! so the game's command thread can call them freely. Persistence happens
//! afterwards through the write-behind queue; memory is always at least as
//! current as the durable copy for loaded owners.

use crate::error::RegistryError;
use crate::types::{Home, OwnerId};
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::debug;

/// All homes belonging to one owner, keyed by canonical lowercase name.
///
/// The `BTreeMap` keeps entries in case-insensitive name order, which is
/// exactly the ordering `list` must return.
#[derive(Debug, Default, Clone)]
pub struct OwnerHomeSet {
    homes: BTreeMap<String, Home>,
}

impl OwnerHomeSet {
    /// Builds a set from freshly loaded homes.
    pub fn from_homes(homes: Vec<Home>) -> Self {
        let mut set = Self::default();
        for home in homes {
            set.homes.insert(home.key(), home);
        }
        set
    }

    /// Number of homes in the set.
    pub fn len(&self) -> usize {
        self.homes.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.homes.is_empty()
    }

    fn get(&self, key: &str) -> Option<&Home> {
        self.homes.get(key)
    }

    fn insert(&mut self, home: Home) -> Option<Home> {
        self.homes.insert(home.key(), home)
    }

    fn remove(&mut self, key: &str) -> Option<Home> {
        self.homes.remove(key)
    }

    fn sorted(&self) -> Vec<Home> {
        self.homes.values().cloned().collect()
    }
}

/// Synchronous, memory-only cache of loaded owner home sets.
///
/// Backed by a `DashMap` so lookups on the command thread never block on a
/// global lock. The cache itself enforces only the per-owner cap; name
/// validation happens in the registry facade before anything reaches here.
#[derive(Debug, Default)]
pub struct HomeCache {
    owners: DashMap<OwnerId, OwnerHomeSet>,
}

impl HomeCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the owner's home set is resident in memory.
    pub fn is_loaded(&self, owner: OwnerId) -> bool {
        self.owners.contains_key(&owner)
    }

    /// Number of owners currently loaded.
    pub fn loaded_owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Looks up one home by its lowercase key. Memory only, never blocks.
    pub fn get(&self, owner: OwnerId, key: &str) -> Option<Home> {
        self.owners
            .get(&owner)
            .and_then(|set| set.get(key).cloned())
    }

    /// All homes for the owner in case-insensitive name order.
    ///
    /// Returns an empty vector when the owner is not loaded.
    pub fn list(&self, owner: OwnerId) -> Vec<Home> {
        self.owners
            .get(&owner)
            .map(|set| set.sorted())
            .unwrap_or_default()
    }

    /// Number of homes the owner currently has (0 when unloaded).
    pub fn home_count(&self, owner: OwnerId) -> usize {
        self.owners.get(&owner).map(|set| set.len()).unwrap_or(0)
    }

    /// Inserts or replaces a home, enforcing the per-owner cap.
    ///
    /// Replacing an existing name never counts against the cap; only a new
    /// name can exceed it. `cap` of `None` means unlimited. Returns the
    /// replaced home, if any. The mutation is visible to readers
    /// immediately, before any persistence has happened.
    pub fn put(
        &self,
        owner: OwnerId,
        home: Home,
        cap: Option<u32>,
    ) -> Result<Option<Home>, RegistryError> {
        let mut entry = self
            .owners
            .get_mut(&owner)
            .ok_or(RegistryError::NotLoaded(owner))?;

        let key = home.key();
        if entry.get(&key).is_none() {
            if let Some(limit) = cap {
                if entry.len() as u32 >= limit {
                    return Err(RegistryError::LimitExceeded { owner, limit });
                }
            }
        }

        Ok(entry.insert(home))
    }

    /// Removes a home by its lowercase key, returning the removed value.
    pub fn remove(&self, owner: OwnerId, key: &str) -> Result<Home, RegistryError> {
        let mut entry = self
            .owners
            .get_mut(&owner)
            .ok_or(RegistryError::NotLoaded(owner))?;

        entry.remove(key).ok_or_else(|| RegistryError::NotFound {
            owner,
            name: key.to_string(),
        })
    }

    /// Installs a freshly loaded home set for an owner.
    ///
    /// Only the load path calls this, and loads only run while the owner is
    /// in the `Loading` state, so there are no memory writes to clobber.
    pub fn install(&self, owner: OwnerId, homes: Vec<Home>) {
        let set = OwnerHomeSet::from_homes(homes);
        debug!("Installed {} homes for owner {}", set.len(), owner);
        self.owners.insert(owner, set);
    }

    /// Drops the owner's set from memory.
    ///
    /// Callers are responsible for making sure no pending operations remain
    /// for the owner; the lifecycle manager sequences flush-then-evict.
    pub fn evict(&self, owner: OwnerId) {
        if self.owners.remove(&owner).is_some() {
            debug!("Evicted home set for owner {}", owner);
        }
    }
}

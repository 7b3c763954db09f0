//! Per-owner teleport cooldown tracking.

use crate::error::RegistryError;
use crate::types::OwnerId;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Tracks the last teleport per owner and enforces a minimum gap.
///
/// Purely in-memory; cooldowns do not survive a restart and are cleared
/// when an owner's set is drained.
#[derive(Debug)]
pub struct CooldownTracker {
    cooldown: Duration,
    last_use: DashMap<OwnerId, Instant>,
}

impl CooldownTracker {
    /// A zero cooldown disables tracking entirely.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_use: DashMap::new(),
        }
    }

    /// Checks the owner's cooldown and, if clear, starts a new one.
    pub fn check_and_touch(&self, owner: OwnerId) -> Result<(), RegistryError> {
        if self.cooldown.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        if let Some(last) = self.last_use.get(&owner) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.cooldown {
                return Err(RegistryError::CooldownActive {
                    remaining: self.cooldown - elapsed,
                });
            }
        }
        self.last_use.insert(owner, now);
        Ok(())
    }

    /// Forgets the owner's cooldown, typically on drain.
    pub fn clear(&self, owner: OwnerId) {
        self.last_use.remove(&owner);
    }
}

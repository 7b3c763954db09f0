//! Registry configuration and defaults.
//!
//! All knobs have serde defaults so a partial TOML section deserializes
//! into a fully usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_homes_per_player_cap() -> u32 {
    3
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_queue_depth_flush_threshold() -> usize {
    64
}

fn default_flush_retry_max_attempts() -> u32 {
    5
}

fn default_idle_eviction_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_pool_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_teleport_cooldown_secs() -> u64 {
    3
}

fn default_retry_backoff_base_ms() -> u64 {
    50
}

fn default_shutdown_flush_timeout_ms() -> u64 {
    10_000
}

/// Configuration for the home registry core.
///
/// Controls the per-owner cap, write-behind flush scheduling, retry policy,
/// idle eviction, and shutdown drain behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Default maximum number of homes per owner. Overridable per owner by
    /// injecting a custom limits provider into the registry.
    #[serde(default = "default_homes_per_player_cap")]
    pub homes_per_player_cap: u32,

    /// Interval between periodic write-behind flush cycles in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Total pending-operation count past which a flush is forced
    /// immediately instead of waiting for the timer
    #[serde(default = "default_queue_depth_flush_threshold")]
    pub queue_depth_flush_threshold: usize,

    /// Maximum attempts per flush or load before the failure is reported
    #[serde(default = "default_flush_retry_max_attempts")]
    pub flush_retry_max_attempts: u32,

    /// Loaded owners with no activity for this long are evicted
    #[serde(default = "default_idle_eviction_ms")]
    pub idle_eviction_ms: u64,

    /// How long a store connection acquire may wait before failing
    #[serde(default = "default_pool_acquire_timeout_ms")]
    pub pool_acquire_timeout_ms: u64,

    /// Minimum seconds between teleport lookups per owner (0 disables)
    #[serde(default = "default_teleport_cooldown_secs")]
    pub teleport_cooldown_secs: u64,

    /// Base delay for exponential retry backoff in milliseconds
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,

    /// How long shutdown waits for the write-behind queues to drain
    #[serde(default = "default_shutdown_flush_timeout_ms")]
    pub shutdown_flush_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            homes_per_player_cap: default_homes_per_player_cap(),
            flush_interval_ms: default_flush_interval_ms(),
            queue_depth_flush_threshold: default_queue_depth_flush_threshold(),
            flush_retry_max_attempts: default_flush_retry_max_attempts(),
            idle_eviction_ms: default_idle_eviction_ms(),
            pool_acquire_timeout_ms: default_pool_acquire_timeout_ms(),
            teleport_cooldown_secs: default_teleport_cooldown_secs(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            shutdown_flush_timeout_ms: default_shutdown_flush_timeout_ms(),
        }
    }
}

impl RegistryConfig {
    /// Interval between periodic flush cycles.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    /// Idle duration after which a loaded owner is evicted.
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_millis(self.idle_eviction_ms)
    }

    /// Acquire timeout handed to the store's connection pool.
    pub fn pool_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_acquire_timeout_ms)
    }

    /// Teleport cooldown duration. Zero disables cooldown tracking.
    pub fn teleport_cooldown(&self) -> Duration {
        Duration::from_secs(self.teleport_cooldown_secs)
    }

    /// Backoff delay for the given zero-based retry attempt, doubling per
    /// attempt and capped at five seconds.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff_base_ms.max(1);
        let ms = base.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(ms.min(5_000))
    }

    /// Deadline for the shutdown drain.
    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_timeout_ms)
    }
}

//! # Hearth Registry - Player Home Core
//!
//! The in-memory core of the player home system: a write-behind cached
//! registry of named teleport destinations, designed to sit on a game
//! server's command path without ever blocking it on storage I/O.
//!
//! ## Design Philosophy
//!
//! Memory is authoritative for every loaded owner. Command handlers read
//! and mutate the cache synchronously; durable persistence trails behind
//! through a per-owner FIFO queue that coalesces redundant writes and
//! flushes whole batches in single store transactions. A mutation is never
//! acknowledged and then silently lost: failed batches are retried with
//! backoff and requeued, and memory keeps serving the newest state
//! throughout.
//!
//! ## Architecture Overview
//!
//! * **[`HomeCache`]** - Synchronous in-memory home sets per owner
//! * **[`WriteBehindQueue`]** - Per-owner FIFO persistence queues with
//!   coalescing, batching and bounded retry
//! * **[`HomeStore`]** - The seam to durable storage; any relational
//!   backend implements it
//! * **[`LifecycleManager`]** - Load coalescing, flush-then-evict drains
//!   and idle eviction
//! * **[`HomeRegistry`]** - The facade command handlers call
//!
//! ## Typical Flow
//!
//! 1. Player joins: [`HomeRegistry::handle_join`] loads their homes once,
//!    coalescing concurrent requests
//! 2. Commands call [`HomeRegistry::set_home`], [`HomeRegistry::home`],
//!    [`HomeRegistry::list_homes`] synchronously against memory
//! 3. The flusher persists queued writes on a timer, on queue depth, or on
//!    demand
//! 4. Player quits: [`HomeRegistry::handle_quit`] flushes their queue and
//!    evicts the cached set
//!
//! ## Thread Safety
//!
//! All shared state lives in lock-free-read `DashMap`s; facade methods
//! take `&self` and the registry is cheap to share behind an `Arc`.

pub use cache::HomeCache;
pub use config::RegistryConfig;
pub use cooldown::CooldownTracker;
pub use error::{RegistryError, StoreError};
pub use lifecycle::LifecycleManager;
pub use queue::WriteBehindQueue;
pub use registry::{validate_name, FixedLimits, HomeLimits, HomeRegistry, MAX_NAME_LEN};
pub use shutdown::ShutdownState;
pub use store::{HomeStore, PendingOp};
pub use types::{Home, Location, OwnerId};

pub mod cache;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod shutdown;
pub mod store;
pub mod types;


#[cfg(test)]
pub(crate) mod test_support;

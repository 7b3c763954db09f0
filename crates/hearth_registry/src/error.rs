//! Error types for the home registry.
//!
//! Two layers: [`RegistryError`] is what command handlers see, reported
//! synchronously and never retried; [`StoreError`] covers everything that
//! can go wrong talking to the backing store and is retried with bounded
//! backoff by the flusher and loader before being surfaced.

use crate::types::OwnerId;
use std::time::Duration;

/// Errors reported by the registry facade to command handlers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The home name failed validation. Names are 1-16 characters of
    /// letters, digits and underscores.
    #[error("invalid home name '{0}'")]
    InvalidName(String),

    /// The owner already has as many homes as their cap allows.
    #[error("home limit of {limit} reached for owner {owner}")]
    LimitExceeded { owner: OwnerId, limit: u32 },

    /// No home with that name exists for the owner.
    #[error("no home named '{name}' for owner {owner}")]
    NotFound { owner: OwnerId, name: String },

    /// The owner's home set is not resident in the cache. Callers should
    /// use the async load path and retry.
    #[error("homes for owner {0} are not loaded")]
    NotLoaded(OwnerId),

    /// Teleport requested again before the cooldown elapsed.
    #[error("teleport cooldown active, {} seconds remaining", remaining.as_secs().max(1))]
    CooldownActive { remaining: Duration },

    /// Shutdown has been initiated; no new mutations are accepted.
    #[error("registry is shutting down")]
    ShuttingDown,

    /// The shutdown drain did not complete within the configured timeout.
    /// Pending operations were not durably persisted.
    #[error("{pending} pending operations unflushed after {timeout:?} shutdown timeout")]
    ShutdownIncomplete { pending: usize, timeout: Duration },

    /// A store failure surfaced through an awaited operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures talking to the backing store.
///
/// Cloneable so a single load failure can be fanned out to every caller
/// waiting on the coalesced in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Connection-level failure (open, handshake, I/O).
    #[error("store connection error: {0}")]
    Connection(String),

    /// The operation exceeded its deadline.
    #[error("store operation timed out: {0}")]
    Timeout(String),

    /// No pool connection became available within the acquire timeout.
    #[error("connection pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    /// A store-level constraint rejected the write.
    #[error("store constraint violation: {0}")]
    Constraint(String),

    /// Statement execution failed.
    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// Whether retrying this failure can plausibly succeed.
    ///
    /// Transient failures (connectivity, timeouts, pool exhaustion) are
    /// retried with backoff; constraint violations and malformed queries
    /// are not going to pass on a second attempt, but the flusher still
    /// keeps the batch so the failure is never silently dropped.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::PoolExhausted(_)
        )
    }
}

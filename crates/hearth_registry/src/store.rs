//! Store adapter seam.
//!
//! The registry core talks to durable storage exclusively through the
//! [`HomeStore`] trait, so any relational backend (or an in-memory test
//! double) can sit behind the write-behind queue. Implementations own
//! their connection pooling and schema migration; the contract here is
//! only about operation semantics.

use crate::error::StoreError;
use crate::types::{Home, OwnerId};
use async_trait::async_trait;

/// A queued create/update/delete for one `(owner, name)` key.
///
/// Operations for the same key are strictly FIFO within an owner's queue;
/// a later operation supersedes an earlier still-unflushed one
/// (coalescing). The key is always the canonical lowercase name so
/// `Upsert("Base")` and `Delete("base")` target the same row.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    /// Create or replace the home at its key.
    Upsert { owner: OwnerId, home: Home },
    /// Remove the home at the given lowercase key.
    Delete { owner: OwnerId, key: String },
}

impl PendingOp {
    /// The owner whose queue this operation belongs to.
    pub fn owner(&self) -> OwnerId {
        match self {
            Self::Upsert { owner, .. } | Self::Delete { owner, .. } => *owner,
        }
    }

    /// The canonical lowercase name key this operation targets.
    pub fn key(&self) -> String {
        match self {
            Self::Upsert { home, .. } => home.key(),
            Self::Delete { key, .. } => key.clone(),
        }
    }
}

/// Durable storage for player homes.
///
/// Implementations must be safe to call from worker tasks concurrently and
/// must release any pooled connection on every path, success or failure.
#[async_trait]
pub trait HomeStore: Send + Sync {
    /// Loads every home owned by `owner` from durable storage.
    ///
    /// Returning an empty vector means the owner durably has no homes;
    /// failures must be reported as errors, never as an empty set.
    async fn load_owner_homes(&self, owner: OwnerId) -> Result<Vec<Home>, StoreError>;

    /// Applies a batch of pending operations as a single transaction.
    ///
    /// Either every operation in the batch is durably applied or none are.
    async fn apply_batch(&self, batch: &[PendingOp]) -> Result<(), StoreError>;

    /// Records one teleport to `(owner, key)` for visit statistics.
    ///
    /// Best-effort: callers log and move on when this fails.
    async fn record_teleport(&self, owner: OwnerId, key: &str) -> Result<(), StoreError>;
}

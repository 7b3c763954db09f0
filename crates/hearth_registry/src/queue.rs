//! Write-behind persistence queue.
//!
//! Mutations are acknowledged as soon as memory is updated; this module
//! carries them to the store afterwards. Each owner has a serial FIFO
//! queue of [`PendingOp`]s. A background flusher drains whole per-owner
//! batches inside a single store transaction, triggered by a periodic
//! timer, an explicit flush request, or the total queue depth crossing the
//! configured threshold.
//!
//! Failure policy: a batch is retried with exponential backoff up to the
//! configured attempt count; after that the failure is logged, the batch is
//! requeued at the front (re-coalescing against anything newer), and the
//! next flush cycle starts over with fresh backoff. Nothing is ever
//! silently dropped - memory keeps the authoritative state throughout.

use crate::config::RegistryConfig;
use crate::error::StoreError;
use crate::store::{HomeStore, PendingOp};
use crate::types::OwnerId;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, warn};

/// One owner's serial operation queue.
#[derive(Debug, Default)]
struct OwnerQueue {
    /// Operations waiting to be taken by the flusher, oldest first
    ops: VecDeque<PendingOp>,
    /// Number of operations currently being flushed
    in_flight: usize,
}

/// Commands accepted by the background flusher.
enum FlushCommand {
    /// Flush one owner's queue and report the outcome.
    FlushOwner {
        owner: OwnerId,
        ack: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Flush every non-empty queue and report the first failure, if any.
    FlushAll {
        ack: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// State shared between the queue handle and the flusher task.
#[derive(Debug, Default)]
struct QueueShared {
    queues: DashMap<OwnerId, OwnerQueue>,
    /// Count of queued (not in-flight) operations across all owners
    depth: AtomicUsize,
    /// Wakes the flusher when the depth threshold is crossed
    kick: Notify,
    /// Callers waiting for an owner's queue to confirm empty
    drain_waiters: DashMap<OwnerId, Vec<oneshot::Sender<()>>>,
}

impl QueueShared {
    /// Queued plus in-flight operations for one owner.
    fn pending_for(&self, owner: OwnerId) -> usize {
        self.queues
            .get(&owner)
            .map(|q| q.ops.len() + q.in_flight)
            .unwrap_or(0)
    }

    /// Queued plus in-flight operations across all owners.
    fn total_pending(&self) -> usize {
        self.queues
            .iter()
            .map(|q| q.ops.len() + q.in_flight)
            .sum()
    }

    /// Fires drain waiters for the owner if nothing remains pending.
    fn notify_if_drained(&self, owner: OwnerId) {
        if self.pending_for(owner) != 0 {
            return;
        }
        if let Some((_, waiters)) = self.drain_waiters.remove(&owner) {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }
}

/// Handle to the write-behind queue.
///
/// `enqueue` is synchronous and safe to call from the command thread; the
/// flush methods are async and intended for worker contexts (lifecycle
/// drains, shutdown).
#[derive(Clone)]
pub struct WriteBehindQueue {
    shared: Arc<QueueShared>,
    commands: mpsc::Sender<FlushCommand>,
    depth_threshold: usize,
}

impl WriteBehindQueue {
    /// Creates the queue and spawns its background flusher task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn HomeStore>, config: &RegistryConfig) -> Self {
        let shared = Arc::new(QueueShared::default());
        let (tx, rx) = mpsc::channel(64);

        let worker = FlushWorker {
            shared: Arc::clone(&shared),
            store,
            config: config.clone(),
        };
        tokio::spawn(run_flusher(worker, rx));

        Self {
            shared,
            commands: tx,
            depth_threshold: config.queue_depth_flush_threshold.max(1),
        }
    }

    /// Appends an operation to its owner's queue, coalescing with any
    /// earlier not-yet-flushing operation on the same key.
    ///
    /// Synchronous and non-blocking; crossing the depth threshold kicks the
    /// flusher immediately instead of waiting for the next timer tick.
    pub fn enqueue(&self, op: PendingOp) {
        let owner = op.owner();
        let key = op.key();

        {
            let mut queue = self.shared.queues.entry(owner).or_default();
            if let Some(pos) = queue.ops.iter().position(|earlier| earlier.key() == key) {
                // Last write wins: the earlier unflushed op is superseded.
                queue.ops.remove(pos);
                self.shared.depth.fetch_sub(1, Ordering::Relaxed);
                debug!("Coalesced pending op for owner {} key '{}'", owner, key);
            }
            queue.ops.push_back(op);
        }

        let depth = self.shared.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if depth >= self.depth_threshold {
            debug!("Queue depth {} reached threshold, forcing flush", depth);
            self.shared.kick.notify_one();
        }
    }

    /// Queued plus in-flight operations for one owner.
    pub fn pending_for(&self, owner: OwnerId) -> usize {
        self.shared.pending_for(owner)
    }

    /// Queued plus in-flight operations across all owners.
    pub fn total_pending(&self) -> usize {
        self.shared.total_pending()
    }

    /// Forces a flush of one owner's queue and awaits the outcome.
    pub async fn flush_owner(&self, owner: OwnerId) -> Result<(), StoreError> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(FlushCommand::FlushOwner { owner, ack })
            .await
            .map_err(|_| StoreError::Connection("flusher task stopped".into()))?;
        rx.await
            .map_err(|_| StoreError::Connection("flusher task stopped".into()))?
    }

    /// Forces a flush of every queue and awaits the outcome.
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(FlushCommand::FlushAll { ack })
            .await
            .map_err(|_| StoreError::Connection("flusher task stopped".into()))?;
        rx.await
            .map_err(|_| StoreError::Connection("flusher task stopped".into()))?
    }

    /// Resolves once the owner has no queued or in-flight operations.
    ///
    /// Returns immediately if the owner's queue is already empty.
    pub async fn wait_drained(&self, owner: OwnerId) {
        let (tx, rx) = oneshot::channel();
        self.shared
            .drain_waiters
            .entry(owner)
            .or_default()
            .push(tx);
        // Resolve immediately if there is nothing pending; otherwise the
        // flusher fires the waiter when the queue confirms empty.
        self.shared.notify_if_drained(owner);
        let _ = rx.await;
    }
}

/// The flusher's working half: shared queue state plus the store handle.
struct FlushWorker {
    shared: Arc<QueueShared>,
    store: Arc<dyn HomeStore>,
    config: RegistryConfig,
}

/// Flusher task body: waits on the timer, the depth kick, and explicit
/// flush commands; exits when the last queue handle is dropped.
async fn run_flusher(worker: FlushWorker, mut commands: mpsc::Receiver<FlushCommand>) {
    let mut ticker = tokio::time::interval(worker.config.flush_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so startup does not
    // race a flush against initial loads.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = worker.flush_cycle(None).await;
            }
            _ = worker.shared.kick.notified() => {
                let _ = worker.flush_cycle(None).await;
            }
            cmd = commands.recv() => match cmd {
                Some(FlushCommand::FlushOwner { owner, ack }) => {
                    let _ = ack.send(worker.flush_cycle(Some(owner)).await);
                }
                Some(FlushCommand::FlushAll { ack }) => {
                    let _ = ack.send(worker.flush_cycle(None).await);
                }
                None => {
                    debug!("Write-behind queue handle dropped, flusher stopping");
                    break;
                }
            }
        }
    }
}

impl FlushWorker {
    /// Flushes one owner, or every owner with pending operations.
    ///
    /// Owners are processed sequentially, so at most one store connection
    /// is held at any moment during a cycle. Returns the first failure but
    /// still attempts the remaining owners.
    async fn flush_cycle(&self, only: Option<OwnerId>) -> Result<(), StoreError> {
        let owners: Vec<OwnerId> = match only {
            Some(owner) => vec![owner],
            None => self
                .shared
                .queues
                .iter()
                .filter(|entry| !entry.ops.is_empty())
                .map(|entry| *entry.key())
                .collect(),
        };

        let mut first_err = None;
        for owner in owners {
            if let Err(e) = self.flush_owner_batch(owner).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn flush_owner_batch(&self, owner: OwnerId) -> Result<(), StoreError> {
        let batch = self.take_batch(owner);
        if batch.is_empty() {
            self.shared.notify_if_drained(owner);
            return Ok(());
        }

        match self.apply_with_retry(owner, &batch).await {
            Ok(()) => {
                debug!("Flushed {} ops for owner {}", batch.len(), owner);
                self.finish_batch(owner);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Persistence degraded: giving up on {} ops for owner {} after {} attempts: {}",
                    batch.len(),
                    owner,
                    self.config.flush_retry_max_attempts,
                    e
                );
                self.requeue_front(owner, batch);
                Err(e)
            }
        }
    }

    /// Takes the owner's whole queue as one batch and marks it in flight.
    fn take_batch(&self, owner: OwnerId) -> Vec<PendingOp> {
        let Some(mut queue) = self.shared.queues.get_mut(&owner) else {
            return Vec::new();
        };
        let batch: Vec<PendingOp> = queue.ops.drain(..).collect();
        queue.in_flight = batch.len();
        drop(queue);
        self.shared.depth.fetch_sub(batch.len(), Ordering::Relaxed);
        batch
    }

    /// Applies one batch with bounded exponential backoff.
    async fn apply_with_retry(
        &self,
        owner: OwnerId,
        batch: &[PendingOp],
    ) -> Result<(), StoreError> {
        let max_attempts = self.config.flush_retry_max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.store.apply_batch(batch).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    let backoff = self.config.retry_backoff(attempt - 1);
                    warn!(
                        "Flush attempt {}/{} for owner {} failed ({}), retrying in {:?}",
                        attempt, max_attempts, owner, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Clears the in-flight marker after a successful flush and fires
    /// drain waiters if the owner's queue is now empty.
    fn finish_batch(&self, owner: OwnerId) {
        if let Some(mut queue) = self.shared.queues.get_mut(&owner) {
            queue.in_flight = 0;
        }
        self.shared
            .queues
            .remove_if(&owner, |_, q| q.ops.is_empty() && q.in_flight == 0);
        self.shared.notify_if_drained(owner);
    }

    /// Returns a failed batch to the front of the owner's queue.
    ///
    /// Operations superseded by something enqueued while the batch was in
    /// flight are dropped: the newer op already carries the final state
    /// for that key.
    fn requeue_front(&self, owner: OwnerId, batch: Vec<PendingOp>) {
        let mut restored = 0usize;
        {
            let mut queue = self.shared.queues.entry(owner).or_default();
            queue.in_flight = 0;
            for op in batch.into_iter().rev() {
                if queue.ops.iter().any(|newer| newer.key() == op.key()) {
                    continue;
                }
                queue.ops.push_front(op);
                restored += 1;
            }
        }
        self.shared.depth.fetch_add(restored, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, MockStore};
    use crate::types::{Home, Location};
    use std::time::Duration;

    fn upsert(owner: OwnerId, name: &str, x: f64) -> PendingOp {
        PendingOp::Upsert {
            owner,
            home: Home::new(name, Location::new("world", x, 64.0, 0.0)),
        }
    }

    fn delete(owner: OwnerId, key: &str) -> PendingOp {
        PendingOp::Delete {
            owner,
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn coalescing_keeps_only_the_latest_write() {
        let store = MockStore::new();
        let queue = WriteBehindQueue::spawn(store.clone(), &test_config());
        let owner = OwnerId::new();

        queue.enqueue(upsert(owner, "base", 1.0));
        queue.enqueue(upsert(owner, "Base", 5.0));
        assert_eq!(queue.pending_for(owner), 1);

        queue.flush_owner(owner).await.unwrap();

        // Exactly one store-level write, reflecting only the second op.
        let batches = store.applied_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        let durable = store.durable_homes(owner);
        assert_eq!(durable.len(), 1);
        assert_eq!(durable[0].location.x, 5.0);
    }

    #[tokio::test]
    async fn upsert_then_delete_coalesces_to_delete() {
        let store = MockStore::new();
        let queue = WriteBehindQueue::spawn(store.clone(), &test_config());
        let owner = OwnerId::new();

        queue.enqueue(upsert(owner, "base", 1.0));
        queue.enqueue(delete(owner, "base"));
        assert_eq!(queue.pending_for(owner), 1);

        queue.flush_owner(owner).await.unwrap();
        assert!(store.durable_homes(owner).is_empty());
    }

    #[tokio::test]
    async fn different_keys_flush_in_enqueue_order() {
        let store = MockStore::new();
        let queue = WriteBehindQueue::spawn(store.clone(), &test_config());
        let owner = OwnerId::new();

        queue.enqueue(upsert(owner, "base", 1.0));
        queue.enqueue(upsert(owner, "farm", 2.0));
        queue.enqueue(delete(owner, "base"));

        queue.flush_owner(owner).await.unwrap();

        let batches = store.applied_batches();
        assert_eq!(batches.len(), 1);
        let keys: Vec<_> = batches[0].iter().map(|op| op.key()).collect();
        // "base" coalesced onto the trailing delete, "farm" kept its slot.
        assert_eq!(keys, vec!["farm", "base"]);
    }

    #[tokio::test]
    async fn transient_failure_retries_until_success() {
        let store = MockStore::new();
        let queue = WriteBehindQueue::spawn(store.clone(), &test_config());
        let owner = OwnerId::new();

        store.fail_next_batches(2);
        queue.enqueue(upsert(owner, "base", 1.0));
        queue.flush_owner(owner).await.unwrap();

        assert_eq!(store.apply_attempts(), 3);
        assert_eq!(store.durable_homes(owner).len(), 1);
        assert_eq!(queue.pending_for(owner), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_requeue_and_later_flush_recovers() {
        let store = MockStore::new();
        let config = test_config();
        let queue = WriteBehindQueue::spawn(store.clone(), &config);
        let owner = OwnerId::new();

        store.fail_next_batches(config.flush_retry_max_attempts);
        queue.enqueue(upsert(owner, "base", 1.0));

        let err = queue.flush_owner(owner).await.unwrap_err();
        assert!(err.is_transient());
        // Never silently dropped: the batch is back in the queue.
        assert_eq!(queue.pending_for(owner), 1);
        assert!(store.durable_homes(owner).is_empty());

        // Store recovers; the next cycle flushes with fresh backoff.
        queue.flush_owner(owner).await.unwrap();
        assert_eq!(queue.pending_for(owner), 0);
        assert_eq!(store.durable_homes(owner).len(), 1);
    }

    #[tokio::test]
    async fn op_enqueued_during_failed_flight_supersedes_requeued_one() {
        let store = MockStore::new();
        let mut config = test_config();
        config.flush_retry_max_attempts = 1;
        let queue = WriteBehindQueue::spawn(store.clone(), &config);
        let owner = OwnerId::new();

        store.fail_next_batches(1);
        queue.enqueue(upsert(owner, "base", 1.0));
        let _ = queue.flush_owner(owner).await.unwrap_err();

        // Newer write for the same key lands while the old one is parked.
        queue.enqueue(upsert(owner, "base", 9.0));
        assert_eq!(queue.pending_for(owner), 1);

        queue.flush_owner(owner).await.unwrap();
        let durable = store.durable_homes(owner);
        assert_eq!(durable.len(), 1);
        assert_eq!(durable[0].location.x, 9.0);
    }

    #[tokio::test]
    async fn depth_threshold_forces_flush_without_timer() {
        let store = MockStore::new();
        let mut config = test_config();
        config.queue_depth_flush_threshold = 2;
        config.flush_interval_ms = 60_000; // timer never fires in this test
        let queue = WriteBehindQueue::spawn(store.clone(), &config);
        let owner = OwnerId::new();

        queue.enqueue(upsert(owner, "base", 1.0));
        queue.enqueue(upsert(owner, "farm", 2.0));

        // The kick is asynchronous; poll until the flusher catches up.
        for _ in 0..100 {
            if queue.total_pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.total_pending(), 0);
        assert_eq!(store.durable_homes(owner).len(), 2);
    }

    #[tokio::test]
    async fn wait_drained_resolves_immediately_when_empty() {
        let store = MockStore::new();
        let queue = WriteBehindQueue::spawn(store, &test_config());
        let owner = OwnerId::new();

        tokio::time::timeout(Duration::from_secs(1), queue.wait_drained(owner))
            .await
            .expect("empty queue should drain instantly");
    }

    #[tokio::test]
    async fn wait_drained_resolves_after_flush() {
        let store = MockStore::new();
        let queue = WriteBehindQueue::spawn(store, &test_config());
        let owner = OwnerId::new();

        queue.enqueue(upsert(owner, "base", 1.0));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_drained(owner).await })
        };
        queue.flush_owner(owner).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain waiter should resolve")
            .unwrap();
    }
}

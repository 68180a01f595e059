//! Memoizing, deduplicating front end to the embedding worker pool.
//!
//! Three paths through [`EmbeddingCache::get_embedding`]:
//!
//! - **hit**: the key was computed before; an already-resolved future.
//! - **join**: the key is in flight; the caller gets the same shared future.
//! - **miss**: an in-flight entry is inserted and one job is submitted.
//!
//! The in-flight decision happens under the map entry lock, so at most one
//! computation per key is ever running. Completion inserts into the cache
//! and removes the in-flight entry under that same lock, so no observer
//! taking it sees a key in both maps.
//!
//! Lock order is always in-flight entry, then cache.

use super::backend::{BackendFactory, EmbeddingBackend};
use super::pool::{Job, WorkerPool};
use crate::config::CacheConfig;
use crate::error::{LatentError, Result};
use crate::vector::Vector;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A cloneable handle to one embedding result.
pub type EmbeddingFuture = Shared<BoxFuture<'static, Result<Vector>>>;

/// Cache lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    NotStarted,
    Starting,
    Ready,
    Failed,
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Default)]
struct CacheStatsInternal {
    hits: AtomicU64,
    joins: AtomicU64,
    misses: AtomicU64,
    computed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl CacheStatsInternal {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computed: self.computed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counter snapshot for an [`EmbeddingCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from the completed cache.
    pub hits: u64,
    /// Requests that joined an in-flight computation.
    pub joins: u64,
    /// Requests that started a computation.
    pub misses: u64,
    /// Backend invocations.
    pub computed: u64,
    /// Computations that ended in an error.
    pub failed: u64,
    /// Submissions rejected by a full queue.
    pub rejected: u64,
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Clone)]
struct InFlight {
    id: u64,
    future: EmbeddingFuture,
}

#[derive(Default)]
struct CacheInner {
    completed: DashMap<String, Vector>,
    in_flight: DashMap<String, InFlight>,
    next_id: AtomicU64,
    stats: CacheStatsInternal,
}

/// Async embedding cache over a bounded pool of per-worker backends.
///
/// # Example
///
/// ```rust
/// use latent_horizon::{CacheConfig, EmbeddingCache, HashedBackend, SeededVectors};
///
/// let cache = EmbeddingCache::new(
///     HashedBackend::factory(SeededVectors::new()),
///     CacheConfig { workers: 2, ..CacheConfig::default() },
/// );
/// cache.start().unwrap();
/// let v = cache.get_embedding_blocking("moss").unwrap();
/// assert_eq!(cache.get_embedding_blocking("moss"), Some(v));
/// cache.shutdown();
/// ```
pub struct EmbeddingCache {
    inner: Arc<CacheInner>,
    factory: Arc<dyn BackendFactory>,
    config: CacheConfig,
    status: Mutex<CacheStatus>,
    pool: RwLock<Option<WorkerPool>>,
}

impl EmbeddingCache {
    pub fn new(factory: impl BackendFactory + 'static, config: CacheConfig) -> Self {
        Self::with_shared_factory(Arc::new(factory), config)
    }

    pub fn with_shared_factory(factory: Arc<dyn BackendFactory>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner::default()),
            factory,
            config,
            status: Mutex::new(CacheStatus::NotStarted),
            pool: RwLock::new(None),
        }
    }

    pub fn status(&self) -> CacheStatus {
        *self.status.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == CacheStatus::Ready
    }

    /// Spin up the worker pool. A no-op if already started.
    ///
    /// With `prewarm` set, returns only after every worker has built its
    /// backend; a failure leaves the cache in [`CacheStatus::Failed`].
    pub fn start(&self) -> Result<()> {
        self.config.validate()?;
        {
            let mut status = self.status.lock();
            match *status {
                CacheStatus::Ready => return Ok(()),
                CacheStatus::Starting => {
                    return Err(LatentError::NotReady("cache is starting".to_string()))
                }
                CacheStatus::NotStarted | CacheStatus::Failed => {
                    *status = CacheStatus::Starting;
                }
            }
        }

        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            prewarm = self.config.prewarm,
            "embedding cache starting"
        );

        match WorkerPool::spawn(
            Arc::clone(&self.factory),
            self.config.workers,
            self.config.queue_capacity,
            self.config.prewarm,
        ) {
            Ok(pool) => {
                *self.pool.write() = Some(pool);
                *self.status.lock() = CacheStatus::Ready;
                info!("embedding cache ready");
                Ok(())
            }
            Err(e) => {
                *self.status.lock() = CacheStatus::Failed;
                error!(error = %e, "embedding cache failed to start");
                Err(e)
            }
        }
    }

    /// Drain the pool (bounded by `shutdown_timeout_ms`), drop in-flight
    /// bookkeeping and return to [`CacheStatus::NotStarted`]. Completed
    /// results are kept.
    pub fn shutdown(&self) {
        *self.status.lock() = CacheStatus::NotStarted;
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.shutdown(Duration::from_millis(self.config.shutdown_timeout_ms));
        }
        self.inner.in_flight.clear();
        info!("embedding cache stopped");
    }

    /// Request the embedding for `key`. Never blocks.
    ///
    /// Fails with `NotReady` before [`start`](Self::start), and with
    /// `QueueSaturated` when the pool rejects the job; either way a later
    /// call may succeed.
    pub fn get_embedding(&self, key: &str) -> EmbeddingFuture {
        if !self.is_ready() {
            return resolved(Err(LatentError::NotReady(format!(
                "embedding cache is {:?}",
                self.status()
            ))));
        }

        if let Some(hit) = self.cached(key) {
            CacheStatsInternal::inc(&self.inner.stats.hits);
            return resolved(Ok(hit));
        }

        let (id, sender, future) = match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(e) => {
                CacheStatsInternal::inc(&self.inner.stats.joins);
                return e.get().future.clone();
            }
            Entry::Vacant(e) => {
                // a completion may have landed after the first check
                if let Some(hit) = self.cached(key) {
                    CacheStatsInternal::inc(&self.inner.stats.hits);
                    return resolved(Ok(hit));
                }
                let (sender, receiver) = oneshot::channel::<Result<Vector>>();
                let future = receiver
                    .map(|r| {
                        r.unwrap_or_else(|_| {
                            Err(LatentError::ComputeFailure(
                                "computation abandoned".to_string(),
                            ))
                        })
                    })
                    .boxed()
                    .shared();
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                e.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                (id, sender, future)
            }
        };
        CacheStatsInternal::inc(&self.inner.stats.misses);

        let task = Box::new(ComputeTask {
            key: key.to_string(),
            id,
            inner: Arc::clone(&self.inner),
            sender: Some(sender),
        });

        let submitted = match self.pool.read().as_ref() {
            Some(pool) => pool.submit(task),
            None => {
                task.fail(LatentError::NotReady("embedding pool stopped".to_string()));
                Err(LatentError::NotReady("embedding pool stopped".to_string()))
            }
        };
        if let Err(e) = submitted {
            if matches!(e, LatentError::QueueSaturated { .. }) {
                CacheStatsInternal::inc(&self.inner.stats.rejected);
            }
            debug!(key, error = %e, "embedding request rejected");
        }

        future
    }

    /// Wait for [`get_embedding`](Self::get_embedding), mapping any failure
    /// to `None`.
    pub fn get_embedding_blocking(&self, key: &str) -> Option<Vector> {
        futures::executor::block_on(self.get_embedding(key)).ok()
    }

    /// A copy of a completed result, without scheduling anything.
    pub fn cached(&self, key: &str) -> Option<Vector> {
        self.inner.completed.get(key).map(|v| v.value().clone())
    }

    pub fn cache_len(&self) -> usize {
        self.inner.completed.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.pool.read().as_ref().map_or(0, WorkerPool::queued)
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }
}

impl Drop for EmbeddingCache {
    fn drop(&mut self) {
        if self.pool.get_mut().is_some() {
            self.shutdown();
        }
    }
}

fn resolved(result: Result<Vector>) -> EmbeddingFuture {
    future::ready(result).boxed().shared()
}

// ============================================================================
// WORKER TASK
// ============================================================================

/// One scheduled computation. Dropping it unfinished resolves its future
/// with an error and clears its in-flight entry.
struct ComputeTask {
    key: String,
    id: u64,
    inner: Arc<CacheInner>,
    sender: Option<oneshot::Sender<Result<Vector>>>,
}

impl ComputeTask {
    fn finish(&mut self, result: Result<Vector>) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        let inner = &self.inner;

        match &result {
            Ok(v) => match inner.in_flight.entry(self.key.clone()) {
                Entry::Occupied(e) if e.get().id == self.id => {
                    inner.completed.insert(self.key.clone(), v.clone());
                    e.remove();
                }
                // superseded after a shutdown cleared our entry
                Entry::Occupied(_) => {}
                Entry::Vacant(_) => {
                    inner.completed.insert(self.key.clone(), v.clone());
                }
            },
            Err(_) => {
                CacheStatsInternal::inc(&inner.stats.failed);
                let id = self.id;
                inner.in_flight.remove_if(&self.key, |_, f| f.id == id);
            }
        }

        // every waiter may have gone away
        let _ = sender.send(result);
    }
}

impl Job for ComputeTask {
    fn run(mut self: Box<Self>, backend: &mut dyn EmbeddingBackend) {
        let result = match self.inner.completed.get(&self.key).map(|v| v.value().clone()) {
            Some(v) => Ok(v),
            None => {
                CacheStatsInternal::inc(&self.inner.stats.computed);
                backend.embed(&self.key)
            }
        };
        if let Err(e) = &result {
            warn!(key = %self.key, error = %e, "embedding computation failed");
        }
        self.finish(result);
    }

    fn fail(mut self: Box<Self>, error: LatentError) {
        self.finish(Err(error));
    }
}

impl Drop for ComputeTask {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.finish(Err(LatentError::ComputeFailure(
                "computation abandoned".to_string(),
            )));
        }
    }
}

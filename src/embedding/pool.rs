//! Fixed-size worker pool with a bounded queue and per-worker backends.
//!
//! Submissions never block: a full queue rejects immediately with
//! [`LatentError::QueueSaturated`].

use super::backend::{BackendFactory, EmbeddingBackend};
use crate::error::{LatentError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A unit of work executed on a worker with that worker's backend.
pub(crate) trait Job: Send {
    fn run(self: Box<Self>, backend: &mut dyn EmbeddingBackend);

    /// The job will never run.
    fn fail(self: Box<Self>, error: LatentError);
}

type ReadyReport = (usize, Result<()>);

/// Pool handle. Dropping it without [`shutdown`](WorkerPool::shutdown)
/// disconnects the queue and lets workers exit after draining.
pub(crate) struct WorkerPool {
    sender: Sender<Box<dyn Job>>,
    handles: Vec<JoinHandle<()>>,
    exited: Receiver<()>,
    abort: Arc<AtomicBool>,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn `workers` threads sharing a queue of `capacity`.
    ///
    /// With `prewarm`, every worker builds its backend before this returns;
    /// any failure tears the pool down and is returned.
    pub(crate) fn spawn(
        factory: Arc<dyn BackendFactory>,
        workers: usize,
        capacity: usize,
        prewarm: bool,
    ) -> Result<Self> {
        let (sender, receiver) = bounded::<Box<dyn Job>>(capacity);
        let (exit_tx, exited) = bounded::<()>(0);
        let (ready_tx, ready_rx) = bounded::<ReadyReport>(workers);
        let abort = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let factory = Arc::clone(&factory);
            let receiver = receiver.clone();
            let ready = prewarm.then(|| ready_tx.clone());
            let abort = Arc::clone(&abort);
            let exit_guard = exit_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("latent-embed-{}", worker_id))
                .spawn(move || {
                    worker_loop(worker_id, factory, receiver, ready, abort);
                    drop(exit_guard);
                })?;
            handles.push(handle);
        }
        drop(ready_tx);
        drop(exit_tx);

        let pool = Self {
            sender,
            handles,
            exited,
            abort,
            capacity,
        };

        if prewarm {
            for _ in 0..workers {
                match ready_rx.recv() {
                    Ok((_, Ok(()))) => {}
                    Ok((worker_id, Err(e))) => {
                        warn!(worker_id, error = %e, "embedding backend prewarm failed");
                        pool.shutdown(Duration::ZERO);
                        return Err(e);
                    }
                    Err(_) => {
                        pool.shutdown(Duration::ZERO);
                        return Err(LatentError::ComputeFailure(
                            "embedding worker exited during prewarm".to_string(),
                        ));
                    }
                }
            }
            info!(workers, "embedding backends prewarmed");
        }

        Ok(pool)
    }

    /// Enqueue without blocking. A rejected job is failed before returning.
    pub(crate) fn submit(&self, job: Box<dyn Job>) -> Result<()> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                let error = LatentError::QueueSaturated {
                    capacity: self.capacity,
                };
                job.fail(error.clone());
                Err(error)
            }
            Err(TrySendError::Disconnected(job)) => {
                let error = LatentError::NotReady("embedding pool stopped".to_string());
                job.fail(error.clone());
                Err(error)
            }
        }
    }

    pub(crate) fn queued(&self) -> usize {
        self.sender.len()
    }

    /// Stop accepting work, let workers drain for up to `timeout`, then
    /// abort: queued jobs are failed and still-busy threads are detached.
    pub(crate) fn shutdown(self, timeout: Duration) {
        let WorkerPool {
            sender,
            handles,
            exited,
            abort,
            ..
        } = self;
        drop(sender);

        let deadline = Instant::now() + timeout;
        let drained = loop {
            match exited.recv_deadline(deadline) {
                Err(RecvTimeoutError::Disconnected) => break true,
                Err(RecvTimeoutError::Timeout) => break false,
                Ok(()) => continue,
            }
        };

        if drained {
            for handle in handles {
                let _ = handle.join();
            }
            info!("embedding pool drained");
        } else {
            abort.store(true, Ordering::Release);
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "embedding pool did not drain in time, detaching workers"
            );
        }
    }
}

fn worker_loop(
    worker_id: usize,
    factory: Arc<dyn BackendFactory>,
    jobs: Receiver<Box<dyn Job>>,
    ready: Option<Sender<ReadyReport>>,
    abort: Arc<AtomicBool>,
) {
    let mut backend: Option<Box<dyn EmbeddingBackend>> = None;

    if let Some(ready) = ready {
        match factory.create(worker_id) {
            Ok(b) => {
                backend = Some(b);
                let _ = ready.send((worker_id, Ok(())));
            }
            Err(e) => {
                let _ = ready.send((worker_id, Err(e)));
                return;
            }
        }
    }
    debug!(worker_id, "embedding worker started");

    for job in jobs.iter() {
        if abort.load(Ordering::Acquire) {
            job.fail(LatentError::NotReady("embedding pool shut down".to_string()));
            continue;
        }
        if backend.is_none() {
            match factory.create(worker_id) {
                Ok(b) => backend = Some(b),
                Err(e) => {
                    warn!(worker_id, error = %e, "embedding backend creation failed");
                    job.fail(e);
                    continue;
                }
            }
        }
        if let Some(b) = backend.as_mut() {
            job.run(&mut **b);
        }
    }

    debug!(worker_id, "embedding worker stopped");
}

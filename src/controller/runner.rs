//! Controller runtime: watch pump plus a bounded pool of workers draining
//! one shared work queue.
//!
//! ```text
//!   store.watch() ──► pump ──► WorkQueue ──► worker 0..N ──► Reconciler
//!                               ▲   │                            │
//!                               │   └── rate limiter ◄── Action / Error
//!                               └───────────── requeue ◄─────────┘
//! ```

use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::events::EventRecorder;
use super::queue::WorkQueue;
use super::rate_limiter::default_rate_limiter;
use super::reconciler::{Action, Reconciler};
use super::recovery;
use crate::store::{Store, WatchEvent};
use crate::types::{Config, ObjectKey, Result};

/// Running totals, updated lock-free by workers.
#[derive(Debug, Default)]
pub struct ControllerStats {
    reconciles: AtomicU64,
    failures: AtomicU64,
    requeues: AtomicU64,
    resyncs: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub reconciles: u64,
    pub failures: u64,
    pub requeues: u64,
    pub resyncs: u64,
}

impl ControllerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reconciles: self.reconciles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct Controller {
    store: Arc<dyn Store>,
    reconciler: Reconciler,
    queue: WorkQueue<ObjectKey>,
    workers: usize,
    cancel: CancellationToken,
    stats: Arc<ControllerStats>,
}

impl Controller {
    /// Build a controller from validated configuration.
    pub fn new(
        store: Arc<dyn Store>,
        config: &Config,
        recorder: Arc<dyn EventRecorder>,
    ) -> Result<Self> {
        config.validate()?;
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(config.reconciler.clone()),
            recorder,
        )?;
        let queue = WorkQueue::new(Box::new(default_rate_limiter(&config.rate_limiter)));
        Ok(Self::from_parts(
            store,
            reconciler,
            queue,
            config.controller.workers,
        ))
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        reconciler: Reconciler,
        queue: WorkQueue<ObjectKey>,
        workers: usize,
    ) -> Self {
        Self {
            store,
            reconciler,
            queue,
            workers: workers.max(1),
            cancel: CancellationToken::new(),
            stats: Arc::new(ControllerStats::default()),
        }
    }

    pub fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Token that stops `run` when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run until cancelled. In-flight reconciliations are aborted at their
    /// next await point; queued work is dropped.
    pub async fn run(&self) -> Result<()> {
        // Subscribe before listing so nothing slips between the two.
        let mut watch = self.store.watch().await?;
        self.enqueue_all().await?;

        tracing::info!(workers = self.workers, "controller started");

        let mut tasks = JoinSet::new();
        for id in 0..self.workers {
            tasks.spawn(worker(
                id,
                self.queue.clone(),
                self.reconciler.clone(),
                self.cancel.clone(),
                self.stats.clone(),
            ));
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = watch.next() => match event {
                    Some(WatchEvent::Applied(key)) | Some(WatchEvent::Deleted(key)) => {
                        self.queue.add(key).await;
                    }
                    Some(WatchEvent::Resync) => {
                        self.stats.resyncs.fetch_add(1, Ordering::Relaxed);
                        if let Err(err) = self.enqueue_all().await {
                            tracing::warn!(error = %err, "resync list failed");
                        }
                    }
                    None => {
                        tracing::warn!("watch stream closed; no further change notifications");
                        self.cancel.cancelled().await;
                        break;
                    }
                },
            }
        }

        tracing::info!("controller shutting down");
        self.queue.shut_down().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "worker task failed");
            }
        }
        tracing::info!(stats = ?self.stats.snapshot(), "controller stopped");
        Ok(())
    }

    async fn enqueue_all(&self) -> Result<()> {
        let keys = self.store.list().await?;
        tracing::debug!(count = keys.len(), "enqueueing all objects");
        for key in keys {
            self.queue.add(key).await;
        }
        Ok(())
    }
}

async fn worker(
    id: usize,
    queue: WorkQueue<ObjectKey>,
    reconciler: Reconciler,
    cancel: CancellationToken,
    stats: Arc<ControllerStats>,
) {
    while let Some(key) = queue.get().await {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = recovery::with_recovery(reconciler.reconcile(&key), "reconcile") => Some(result),
        };
        stats.reconciles.fetch_add(1, Ordering::Relaxed);

        match outcome {
            None => {
                tracing::debug!(worker = id, key = %key, "reconcile aborted by shutdown");
                queue.done(&key).await;
                break;
            }
            Some(Ok(Action::NoRequeue)) => {
                queue.forget(&key).await;
            }
            Some(Ok(Action::RequeueAfter(delay))) => {
                queue.forget(&key).await;
                queue.add_after(key.clone(), delay).await;
                stats.requeues.fetch_add(1, Ordering::Relaxed);
            }
            Some(Ok(Action::RequeueImmediately)) => {
                queue.forget(&key).await;
                queue.add_paced(key.clone()).await;
                stats.requeues.fetch_add(1, Ordering::Relaxed);
            }
            Some(Err(err)) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                let attempts = queue.num_requeues(&key).await;
                if err.is_retryable() {
                    tracing::warn!(worker = id, key = %key, attempts, error = %err, "reconcile failed");
                } else {
                    tracing::error!(worker = id, key = %key, attempts, error = %err, "reconcile failed");
                }
                queue.add_rate_limited(key.clone()).await;
            }
        }
        queue.done(&key).await;
    }
    tracing::debug!(worker = id, "worker stopped");
}

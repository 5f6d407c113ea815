//! Controller run-loop
//!
//! A [`Controller`] owns a work queue, gates its workers on the watched
//! caches being synced, and feeds sync results back into the queue's retry
//! policy. Concrete controllers only supply a [`Reconcile`] implementation
//! and the informers they watch.

pub mod events;
pub mod image_registry_config;
pub mod nodecadaemon;

pub use events::{EnqueueKeyHandler, WORK_QUEUE_KEY};
pub use image_registry_config::{new_image_registry_config_controller, PrivateConfigurationSync};
pub use nodecadaemon::{new_node_ca_daemon_controller, NodeCaDaemonSync};

use crate::cache::CacheSynced;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::workqueue::{RateLimiter, WorkQueue};
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One reconciliation attempt for a work key.
#[async_trait]
pub trait Reconcile<K>: Send + Sync {
    async fn sync(&self, key: &K) -> Result<()>;
}

/// Generic level-triggered controller.
pub struct Controller<K> {
    name: String,
    queue: Arc<WorkQueue<K>>,
    reconciler: Arc<dyn Reconcile<K>>,
    caches: Vec<Arc<dyn CacheSynced>>,
    events_tx: mpsc::UnboundedSender<K>,
    events_rx: mpsc::UnboundedReceiver<K>,
    config: ControllerConfig,
}

impl<K> Controller<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        reconciler: Arc<dyn Reconcile<K>>,
        rate_limiter: Box<dyn RateLimiter<K>>,
        config: ControllerConfig,
    ) -> Self {
        let name = name.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            queue: Arc::new(WorkQueue::new(name.clone(), rate_limiter)),
            name,
            reconciler,
            caches: Vec::new(),
            events_tx,
            events_rx,
            config,
        }
    }

    /// Require `cache` to be synced before any worker starts.
    pub fn with_cache(mut self, cache: Arc<dyn CacheSynced>) -> Self {
        self.caches.push(cache);
        self
    }

    /// Handler that signals `key` for every notification.
    pub fn event_handler(&self, key: K) -> Arc<EnqueueKeyHandler<K>> {
        Arc::new(EnqueueKeyHandler::new(key, self.events_tx.clone()))
    }

    pub fn queue(&self) -> Arc<WorkQueue<K>> {
        Arc::clone(&self.queue)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheSyncTimeout`] when the watched caches do not
    /// sync in time; no worker is started in that case.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Controller {
            name,
            queue,
            reconciler,
            caches,
            events_tx,
            events_rx,
            config,
        } = self;
        drop(events_tx);

        info!(controller = %name, "Starting {}", name);
        let pump = tokio::spawn(pump_events(events_rx, Arc::clone(&queue)));

        let worker = Arc::new(Worker {
            name: name.clone(),
            queue: Arc::clone(&queue),
            reconciler,
        });
        let result = run_workers(worker, &caches, &config, &shutdown).await;

        queue.shut_down().await;
        pump.abort();
        info!(controller = %name, "Stopped {}", name);
        result
    }
}

async fn run_workers<K>(
    worker: Arc<Worker<K>>,
    caches: &[Arc<dyn CacheSynced>],
    config: &ControllerConfig,
    shutdown: &CancellationToken,
) -> Result<()>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    if !wait_for_cache_sync(&worker.name, caches, config.cache_sync_timeout(), shutdown).await? {
        return Ok(());
    }

    let handles: Vec<_> = (0..config.workers)
        .map(|_| {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { while worker.process_next_work_item().await {} })
        })
        .collect();
    info!(controller = %worker.name, workers = handles.len(), "Started {}", worker.name);

    shutdown.cancelled().await;
    info!(controller = %worker.name, "Shutting down {}", worker.name);

    worker.queue.shut_down_with_drain().await;
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(controller = %worker.name, error = %e, "worker exited abnormally");
        }
    }
    Ok(())
}

/// Forward signalled keys into the queue.
async fn pump_events<K>(mut rx: mpsc::UnboundedReceiver<K>, queue: Arc<WorkQueue<K>>)
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    while let Some(key) = rx.recv().await {
        queue.add(key).await;
    }
}

/// Block until every cache reports synced.
///
/// Returns `Ok(false)` when `shutdown` fires first.
///
/// # Errors
///
/// Returns [`Error::CacheSyncTimeout`] after `timeout`.
pub async fn wait_for_cache_sync(
    controller: &str,
    caches: &[Arc<dyn CacheSynced>],
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<bool> {
    debug!(controller, caches = caches.len(), "waiting for caches to sync");
    let synced = futures::future::join_all(caches.iter().map(|c| c.wait_synced()));

    tokio::select! {
        _ = shutdown.cancelled() => Ok(false),
        res = tokio::time::timeout(timeout, synced) => match res {
            Ok(_) => {
                debug!(controller, "caches synced");
                Ok(true)
            }
            Err(_) => {
                error!(controller, "timed out waiting for caches to sync");
                Err(Error::CacheSyncTimeout(controller.to_string()))
            }
        },
    }
}

struct Worker<K> {
    name: String,
    queue: Arc<WorkQueue<K>>,
    reconciler: Arc<dyn Reconcile<K>>,
}

impl<K> Worker<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Handle one key. Returns false once the queue has shut down.
    async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        debug!(controller = %self.name, key = ?key, "get event from workqueue");

        let result = AssertUnwindSafe(self.reconciler.sync(&key))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::Invariant(format!("sync of {key:?} panicked"))));

        match result {
            Ok(()) => {
                self.queue.forget(&key);
                info!(controller = %self.name, key = ?key, "event from workqueue successfully processed");
            }
            Err(e) if e.is_retryable() => {
                // Requeue the key we dequeued, not a fixed one.
                self.queue.add_rate_limited(key.clone()).await;
                error!(
                    controller = %self.name,
                    key = ?key,
                    requeues = self.queue.num_requeues(&key),
                    error = %e,
                    "unable to sync, requeuing"
                );
            }
            Err(e) => {
                self.queue.forget(&key);
                error!(controller = %self.name, key = ?key, error = %e, "unable to sync, not retrying");
            }
        }

        self.queue.done(&key).await;
        true
    }
}

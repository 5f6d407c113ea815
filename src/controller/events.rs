//! Event adapter
//!
//! The controllers are level-triggered: every add, update or delete of a
//! watched object only means "something relevant may have changed". The
//! payload is discarded and a single collapsed key is signalled instead.

use crate::cache::ResourceEventHandler;
use tokio::sync::mpsc;
use tracing::trace;

/// The one logical unit each shipped controller reconciles.
pub const WORK_QUEUE_KEY: &str = "instance";

/// Signals a fixed key for every notification it receives.
pub struct EnqueueKeyHandler<K> {
    key: K,
    tx: mpsc::UnboundedSender<K>,
}

impl<K: Clone> EnqueueKeyHandler<K> {
    pub fn new(key: K, tx: mpsc::UnboundedSender<K>) -> Self {
        Self { key, tx }
    }

    fn signal(&self) {
        if self.tx.send(self.key.clone()).is_err() {
            trace!("controller stopped, dropping notification");
        }
    }
}

impl<K, O> ResourceEventHandler<O> for EnqueueKeyHandler<K>
where
    K: Clone + Send + Sync,
{
    fn on_add(&self, _obj: &O) {
        self.signal();
    }

    fn on_update(&self, _old: &O, _new: &O) {
        self.signal();
    }

    fn on_delete(&self, _obj: &O) {
        self.signal();
    }
}

//! Informer
//!
//! Runs a kube-rs watcher, keeps a reflector store current and fans
//! add/update/delete notifications out to registered handlers.

use super::{CacheSynced, StoreLister};
use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callbacks for changes observed by an [`Informer`].
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

/// Watches one resource kind and maintains its local cache.
pub struct Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    api: Api<K>,
    config: watcher::Config,
    events: EventProcessor<K>,
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(api: Api<K>, config: watcher::Config) -> Self {
        Self {
            api,
            config,
            events: EventProcessor::new(),
        }
    }

    /// Register a handler. Handlers only see events dispatched after
    /// registration, so register before calling [`Informer::run`].
    pub fn add_event_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.events.handlers.push(handler);
    }

    pub fn lister(&self, namespace: impl Into<String>) -> StoreLister<K> {
        StoreLister::new(self.events.store.clone(), namespace)
    }

    /// Readiness handle for the controller's cache sync barrier.
    pub fn handle(&self) -> InformerHandle {
        self.events.handle()
    }

    /// Drive the watch until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let name = self.events.name.clone();
        info!(informer = %name, "starting informer");
        let stream = watcher(self.api.clone(), self.config.clone()).default_backoff();
        let mut stream = std::pin::pin!(stream);

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        warn!(informer = %name, error = %e, "watch failed, retrying");
                        continue;
                    }
                    None => break,
                },
            };
            self.events.apply(event);
        }

        info!(informer = %name, "informer stopped");
    }
}

/// Applies watch events to the cache and dispatches notifications.
struct EventProcessor<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    name: String,
    writer: Writer<K>,
    store: Store<K>,
    handlers: Vec<Arc<dyn ResourceEventHandler<K>>>,
    synced: watch::Sender<bool>,
    /// Objects seen since the current relist began.
    relisted: Option<HashSet<ObjectRef<K>>>,
}

impl<K> EventProcessor<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn new() -> Self {
        let writer = Writer::default();
        let store = writer.as_reader();
        let (synced, _) = watch::channel(false);
        Self {
            name: K::plural(&()).into_owned(),
            writer,
            store,
            handlers: Vec::new(),
            synced,
            relisted: None,
        }
    }

    fn handle(&self) -> InformerHandle {
        InformerHandle {
            synced: self.synced.subscribe(),
        }
    }

    fn apply(&mut self, event: Event<K>) {
        match &event {
            Event::Apply(obj) | Event::InitApply(obj) => {
                let key = ObjectRef::from_obj(obj);
                let old = self.store.get(&key);
                self.writer.apply_watcher_event(&event);
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(key);
                }
                match old {
                    Some(old) => self.dispatch(|h| h.on_update(&old, obj)),
                    None => self.dispatch(|h| h.on_add(obj)),
                }
            }
            Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                self.dispatch(|h| h.on_delete(obj));
            }
            Event::Init => {
                self.writer.apply_watcher_event(&event);
                self.relisted = Some(HashSet::new());
            }
            Event::InitDone => {
                let before = self.store.state();
                self.writer.apply_watcher_event(&event);
                // Objects deleted while the watch was disconnected never get a
                // Delete event; they only vanish from the relisted set.
                let seen = self.relisted.take().unwrap_or_default();
                for obj in before {
                    if !seen.contains(&ObjectRef::from_obj(obj.as_ref())) {
                        self.dispatch(|h| h.on_delete(obj.as_ref()));
                    }
                }
                if !self.synced.send_replace(true) {
                    debug!(informer = %self.name, objects = self.store.state().len(), "initial list complete");
                }
            }
        }
    }

    fn dispatch(&self, f: impl Fn(&dyn ResourceEventHandler<K>)) {
        for handler in &self.handlers {
            f(handler.as_ref());
        }
    }
}

/// Cloneable readiness view of an [`Informer`].
#[derive(Clone)]
pub struct InformerHandle {
    synced: watch::Receiver<bool>,
}

#[async_trait]
impl CacheSynced for InformerHandle {
    fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    async fn wait_synced(&self) {
        let mut synced = self.synced.clone();
        if synced.wait_for(|s| *s).await.is_err() {
            // The informer stopped before its first list completed.
            futures::future::pending::<()>().await;
        }
    }
}

//! Watch/cache collaborator
//!
//! Locally cached, eventually consistent views of cluster state. Listers
//! read from the cache synchronously; [`CacheSynced`] exposes the
//! initial-list readiness used by the controller's startup barrier.

mod informer;

pub use informer::{Informer, InformerHandle, ResourceEventHandler};

use crate::error::{Error, Result};
use crate::resource::Identity;
use async_trait::async_trait;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::Resource;
use std::sync::Arc;

/// Cache-backed read-by-name within one namespace.
pub trait NamespaceLister<K>: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the cache holds no such object.
    fn get(&self, name: &str) -> Result<Arc<K>>;
}

/// Readiness of one watched cache.
#[async_trait]
pub trait CacheSynced: Send + Sync {
    /// Whether the initial list has been fully applied to the cache.
    fn has_synced(&self) -> bool;

    /// Resolve once [`CacheSynced::has_synced`] turns true.
    async fn wait_synced(&self);
}

/// [`NamespaceLister`] over a kube-rs reflector store.
#[derive(Clone)]
pub struct StoreLister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
    group: String,
    resource: String,
    namespace: String,
}

impl<K> StoreLister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn new(store: Store<K>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            group: K::group(&()).into_owned(),
            resource: K::plural(&()).into_owned(),
            namespace: namespace.into(),
        }
    }
}

impl<K> NamespaceLister<K> for StoreLister<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn get(&self, name: &str) -> Result<Arc<K>> {
        let key = ObjectRef::<K>::new(name).within(&self.namespace);
        self.store.get(&key).ok_or_else(|| {
            Error::NotFound(
                Identity::new(&self.group, &self.resource, &self.namespace, name).to_string(),
            )
        })
    }
}

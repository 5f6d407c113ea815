//! Cluster API client
//!
//! Typed create/update/delete per resource kind. Failures are classified
//! into the operator's error taxonomy at this boundary so mutators never
//! inspect raw HTTP statuses.

use crate::error::{Error, Result};
use crate::resource::{Identity, FIELD_MANAGER};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Write access to one resource kind in one namespace.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Live read, bypassing any cache.
    async fn get(&self, name: &str) -> Result<K>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace the object. `obj` must carry the resource version it was read at.
    async fn update(&self, name: &str, obj: &K) -> Result<K>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// [`ResourceClient`] backed by a namespaced [`kube::Api`].
pub struct KubeClient<K> {
    api: Api<K>,
    namespace: String,
}

impl<K> KubeClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    fn identity(&self, name: &str) -> Identity {
        Identity::new(K::group(&()), K::plural(&()), &self.namespace, name)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl<K> ResourceClient<K> for KubeClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, name: &str) -> Result<K> {
        self.api
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, &self.identity(name)))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        self.api
            .create(&Self::post_params(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &self.identity(&name)))
    }

    async fn update(&self, name: &str, obj: &K) -> Result<K> {
        self.api
            .replace(name, &Self::post_params(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &self.identity(name)))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, &self.identity(name)))
    }
}

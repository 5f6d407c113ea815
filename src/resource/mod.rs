//! Mutators and the apply algorithm
//!
//! A [`Mutator`] wraps one desired-state generator behind a uniform
//! contract so that [`apply_mutator`] can drive any resource kind through
//! the same create/update/no-op decision.

pub mod daemonset;
pub mod secret;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, info};

pub use daemonset::{NodeCaDaemonSetGenerator, NodeCaParams};
pub use secret::SecretGenerator;

/// Field manager recorded on every write issued by this operator.
pub const FIELD_MANAGER: &str = "registry-operator";

/// Address of the object a mutator manages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub group: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
}

impl Identity {
    pub fn new(
        group: impl Into<String>,
        resource: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = if self.group.is_empty() { "core" } else { &self.group };
        write!(
            f,
            "{}/{} {}/{}",
            group, self.resource, self.namespace, self.name
        )
    }
}

/// Per-kind plugin exposing fetch/create/update/delete/desired-state.
///
/// A mutator is built fresh for every reconciliation attempt from the
/// current lister and client handles and must not be reused.
#[async_trait]
pub trait Mutator: Send + Sync {
    type Object: Clone + Send + Sync;

    /// Stable address of the target object.
    fn identity(&self) -> Identity;

    /// Read the current object, preferring the cache. A miss is
    /// [`Error::NotFound`].
    async fn get(&self) -> Result<Self::Object>;

    /// Read the current object from the API server, bypassing the cache.
    async fn fetch(&self) -> Result<Self::Object> {
        self.get().await
    }

    /// Compute the desired object from the current inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] when a required input is missing.
    async fn expected(&self) -> Result<Self::Object>;

    async fn create(&self, desired: Self::Object) -> Result<Self::Object>;

    /// Bring `current` in line with the desired state.
    ///
    /// Only fields this mutator manages are compared; the returned flag is
    /// true when a write was issued.
    async fn update(&self, current: Self::Object) -> Result<(Self::Object, bool)>;

    async fn delete(&self) -> Result<()>;

    /// Whether this controller exclusively owns the object.
    fn owned(&self) -> bool;
}

/// Perform exactly one of create, update or no-op for `m`.
///
/// Returns whether a write happened. Errors are returned unmodified so the
/// caller can apply its retry policy.
pub async fn apply_mutator<M>(m: &M) -> Result<bool>
where
    M: Mutator + ?Sized,
{
    let identity = m.identity();

    let current = match m.get().await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => {
            let desired = m.expected().await?;
            match m.create(desired).await {
                Ok(_) => {
                    info!(object = %identity, "object created");
                    return Ok(true);
                }
                Err(e) if e.is_already_exists() => {
                    debug!(object = %identity, "object appeared concurrently, updating instead");
                    m.fetch().await?
                }
                Err(e) => return Err(e),
            }
        }
        Err(e) => return Err(e),
    };

    let (_, changed) = m.update(current).await?;
    if changed {
        info!(object = %identity, "object updated");
    } else {
        debug!(object = %identity, "object is up to date");
    }
    Ok(changed)
}

/// Delete the object managed by `m` on explicit request.
///
/// An object that is already gone counts as deleted.
///
/// # Errors
///
/// Returns [`Error::Invariant`] when the mutator does not own its object.
pub async fn delete_mutator<M>(m: &M) -> Result<()>
where
    M: Mutator + ?Sized,
{
    let identity = m.identity();
    if !m.owned() {
        return Err(Error::Invariant(format!(
            "refusing to delete {identity}: object is not owned by this controller"
        )));
    }

    match m.delete().await {
        Ok(()) => {
            info!(object = %identity, "object deleted");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Write `merged` only when it differs from `current`.
///
/// `merged` is `current` with the mutator's managed fields overwritten, so
/// equality here is equality on exactly those fields.
pub(crate) async fn common_update<K, F, Fut>(current: K, merged: K, write: F) -> Result<(K, bool)>
where
    K: PartialEq,
    F: FnOnce(K) -> Fut,
    Fut: std::future::Future<Output = Result<K>>,
{
    if merged == current {
        return Ok((current, false));
    }
    let written = write(merged).await?;
    Ok((written, true))
}

//! Storage drivers
//!
//! A driver describes how the registry talks to its storage backend: the
//! environment the registry container needs and the secret material that
//! ends up in the private-configuration secret.

mod emptydir;
mod s3;

pub use emptydir::EmptyDirDriver;
pub use s3::S3Driver;

use crate::config::StorageConfig;
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One environment variable of the registry container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    /// Secret values are delivered through the private-configuration secret
    /// instead of the pod spec.
    pub secret: bool,
}

impl EnvVar {
    pub fn plain(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            secret: true,
        }
    }
}

/// Registry environment derived from a storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEnv(pub Vec<EnvVar>);

impl ConfigEnv {
    /// Name/value pairs of the secret entries.
    pub fn secret_data(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter(|e| e.secret)
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect()
    }

    pub fn plain(&self) -> impl Iterator<Item = &EnvVar> {
        self.0.iter().filter(|e| !e.secret)
    }
}

/// Read-only query surface of a storage backend.
///
/// Failures are reported as [`crate::Error::Computation`]: the desired
/// state cannot be built until the backend configuration is fixed.
#[cfg_attr(test, mockall::automock)]
pub trait Driver: Send + Sync {
    fn config_env(&self) -> Result<ConfigEnv>;

    /// Extra files mounted from the private-configuration secret.
    fn volume_secrets(&self) -> Result<BTreeMap<String, String>>;
}

/// Build the driver selected by `config`, if any.
pub fn new_driver(config: &StorageConfig) -> Option<Arc<dyn Driver>> {
    match config {
        StorageConfig::S3(s3) => Some(Arc::new(S3Driver::new(s3.clone()))),
        StorageConfig::EmptyDir(dir) => Some(Arc::new(EmptyDirDriver::new(dir.clone()))),
        StorageConfig::None => None,
    }
}

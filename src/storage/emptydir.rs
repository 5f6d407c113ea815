use super::{ConfigEnv, Driver, EnvVar};
use crate::config::EmptyDirStorageConfig;
use crate::error::Result;
use std::collections::BTreeMap;

/// Pod-local filesystem storage. Carries no secret material.
pub struct EmptyDirDriver {
    config: EmptyDirStorageConfig,
}

impl EmptyDirDriver {
    pub fn new(config: EmptyDirStorageConfig) -> Self {
        Self { config }
    }
}

impl Driver for EmptyDirDriver {
    fn config_env(&self) -> Result<ConfigEnv> {
        Ok(ConfigEnv(vec![
            EnvVar::plain("REGISTRY_STORAGE", "filesystem"),
            EnvVar::plain(
                "REGISTRY_STORAGE_FILESYSTEM_ROOTDIRECTORY",
                self.config.root_directory.clone(),
            ),
        ]))
    }

    fn volume_secrets(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

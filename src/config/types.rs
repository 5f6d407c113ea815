use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main operator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Namespace holding every object this operator manages
    pub namespace: String,

    /// Secret carrying the registry's storage credentials
    pub private_configuration_secret: String,

    /// Service fronting the registry
    pub registry_service: String,

    /// DaemonSet distributing the registry CA to nodes
    pub node_ca_daemon_set: String,

    /// Image run by the node-ca daemon set
    pub node_ca_image: String,

    pub node_ca_service_account: String,

    pub controller: ControllerConfig,

    pub rate_limit: RateLimitConfig,

    pub storage: StorageConfig,

    pub logging: LoggingConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "openshift-image-registry".to_string(),
            private_configuration_secret: "image-registry-private-configuration".to_string(),
            registry_service: "image-registry".to_string(),
            node_ca_daemon_set: "node-ca".to_string(),
            node_ca_image: "quay.io/openshift/origin-cli:latest".to_string(),
            node_ca_service_account: "node-ca".to_string(),
            controller: ControllerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Reject settings the run-loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::InvalidConfig("namespace must not be empty".to_string()));
        }
        if self.controller.workers == 0 {
            return Err(Error::InvalidConfig("controller.workers must be at least 1".to_string()));
        }
        if self.rate_limit.qps == 0 || self.rate_limit.burst == 0 {
            return Err(Error::InvalidConfig(
                "rate_limit.qps and rate_limit.burst must be positive".to_string(),
            ));
        }
        if self.rate_limit.base_delay() > self.rate_limit.max_delay() {
            return Err(Error::InvalidConfig(
                "rate_limit.base_delay_ms exceeds rate_limit.max_delay_secs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run-loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Worker tasks per controller
    pub workers: usize,

    /// Upper bound on the startup cache sync barrier
    pub cache_sync_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            cache_sync_timeout_secs: 300,
        }
    }
}

impl ControllerConfig {
    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }
}

/// Requeue backoff. Defaults match the usual controller rate limiter:
/// per-key exponential backoff from 5ms to 1000s combined with an overall
/// 10 qps bucket allowing bursts of 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    pub qps: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_secs: 1000,
            qps: 10,
            burst: 100,
        }
    }
}

impl RateLimitConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Registry storage backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageConfig {
    S3(S3StorageConfig),
    EmptyDir(EmptyDirStorageConfig),
    /// Not configured yet; the private-configuration secret cannot be built.
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3StorageConfig {
    pub bucket: String,
    pub region: String,
    pub region_endpoint: Option<String>,
    pub encrypt: bool,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmptyDirStorageConfig {
    pub root_directory: String,
}

impl Default for EmptyDirStorageConfig {
    fn default() -> Self {
        Self {
            root_directory: "/registry".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter, overridden by RUST_LOG
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Also write daily-rotated log files here
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

//! Operator configuration
//!
//! Layered from built-in defaults, an optional file, the environment and
//! command-line overrides.

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{
    ControllerConfig, EmptyDirStorageConfig, LoggingConfig, OperatorConfig, RateLimitConfig,
    S3StorageConfig, StorageConfig,
};

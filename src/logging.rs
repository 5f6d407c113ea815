//! Logging setup
//!
//! Console output through `tracing-subscriber`, optionally mirrored to a
//! daily-rotated file through `tracing-appender`.

use crate::config::LoggingConfig;
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "registry-operator.log";

/// Build the `EnvFilter` for `config`. `RUST_LOG` wins when set.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},kube=warn,hyper=warn", config.level)))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// stops the file writer.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console = if config.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console)
        .with(file)
        .try_init()?;

    Ok(guard)
}

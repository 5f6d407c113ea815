//! Image registry operator binary
use anyhow::{Context, Result};
use clap::Parser;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::runtime::watcher;
use kube::{Api, Client};
use registry_operator::cache::Informer;
use registry_operator::client::KubeClient;
use registry_operator::config::ConfigLoader;
use registry_operator::controller::{
    new_image_registry_config_controller, new_node_ca_daemon_controller,
};
use registry_operator::{logging, storage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Reconciles the image registry's private configuration and node CA installer
#[derive(Parser, Debug)]
#[command(name = "registry-operator")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "REGISTRY_OPERATOR_CONFIG")]
    config: Option<String>,

    /// Namespace holding the registry and its supporting objects
    #[arg(short, long, env = "REGISTRY_OPERATOR_NAMESPACE")]
    namespace: Option<String>,

    /// Worker tasks per controller
    #[arg(short, long, env = "REGISTRY_OPERATOR_WORKERS")]
    workers: Option<u64>,

    /// Log level filter (RUST_LOG takes precedence)
    #[arg(long, env = "REGISTRY_OPERATOR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, env = "REGISTRY_OPERATOR_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new()
        .load_from_file(cli.config.as_deref())
        .load_from_env();
    if let Some(namespace) = cli.namespace {
        loader = loader.set("namespace", namespace);
    }
    if let Some(workers) = cli.workers {
        loader = loader.set("controller.workers", workers);
    }
    if let Some(level) = cli.log_level {
        loader = loader.set("logging.level", level);
    }
    if cli.log_json {
        loader = loader.set("logging.json", true);
    }
    let config = loader.build().context("failed to load configuration")?;

    let _guard = logging::init(&config.logging)?;
    info!(namespace = %config.namespace, "Starting image registry operator");

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let ns = config.namespace.as_str();
    let mut daemon_sets = Informer::new(
        Api::<DaemonSet>::namespaced(client.clone(), ns),
        watcher::Config::default(),
    );
    let mut services = Informer::new(
        Api::<Service>::namespaced(client.clone(), ns),
        watcher::Config::default(),
    );
    let mut secrets = Informer::new(
        Api::<Secret>::namespaced(client.clone(), ns),
        watcher::Config::default(),
    );

    let driver = storage::new_driver(&config.storage);
    if driver.is_none() {
        warn!("no storage configured, private configuration will not be written");
    }

    let node_ca = new_node_ca_daemon_controller(
        &config,
        &mut daemon_sets,
        &mut services,
        Arc::new(KubeClient::<DaemonSet>::new(client.clone(), ns)),
    );
    let image_registry_config = new_image_registry_config_controller(
        &config,
        &mut secrets,
        Arc::new(KubeClient::<Secret>::new(client.clone(), ns)),
        driver,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(daemon_sets.run(shutdown.clone()));
    tokio::spawn(services.run(shutdown.clone()));
    tokio::spawn(secrets.run(shutdown.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    let result = tokio::try_join!(
        node_ca.run(shutdown.clone()),
        image_registry_config.run(shutdown.clone()),
    );
    shutdown.cancel();

    if let Err(e) = result {
        error!(error = %e, "Controller error");
        return Err(e.into());
    }

    info!("Image registry operator stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

//! node-ca daemon controller
//!
//! Keeps the node-ca daemon set in line with the registry Service. Any
//! change to a daemon set or service in the operator namespace triggers a
//! full reconcile of the one collapsed key.

use super::{Controller, Reconcile, WORK_QUEUE_KEY};
use crate::cache::{Informer, NamespaceLister};
use crate::client::ResourceClient;
use crate::config::OperatorConfig;
use crate::error::Result;
use crate::resource::{apply_mutator, NodeCaDaemonSetGenerator, NodeCaParams};
use crate::workqueue::default_controller_rate_limiter;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Service;
use std::sync::Arc;
use tracing::debug;

pub struct NodeCaDaemonSync {
    daemon_sets: Arc<dyn NamespaceLister<DaemonSet>>,
    services: Arc<dyn NamespaceLister<Service>>,
    client: Arc<dyn ResourceClient<DaemonSet>>,
    params: NodeCaParams,
}

impl NodeCaDaemonSync {
    pub fn new(
        daemon_sets: Arc<dyn NamespaceLister<DaemonSet>>,
        services: Arc<dyn NamespaceLister<Service>>,
        client: Arc<dyn ResourceClient<DaemonSet>>,
        params: NodeCaParams,
    ) -> Self {
        Self {
            daemon_sets,
            services,
            client,
            params,
        }
    }
}

#[async_trait]
impl Reconcile<&'static str> for NodeCaDaemonSync {
    async fn sync(&self, _key: &&'static str) -> Result<()> {
        let generator = NodeCaDaemonSetGenerator::new(
            Arc::clone(&self.daemon_sets),
            Arc::clone(&self.services),
            Arc::clone(&self.client),
            self.params.clone(),
        );
        let changed = apply_mutator(&generator).await?;
        debug!(changed, "node-ca daemon set reconciled");
        Ok(())
    }
}

pub(crate) fn node_ca_params(config: &OperatorConfig) -> NodeCaParams {
    NodeCaParams {
        namespace: config.namespace.clone(),
        name: config.node_ca_daemon_set.clone(),
        registry_service: config.registry_service.clone(),
        image: config.node_ca_image.clone(),
        service_account: config.node_ca_service_account.clone(),
    }
}

/// Wire the controller to its informers. Call before the informers run.
pub fn new_node_ca_daemon_controller(
    config: &OperatorConfig,
    daemon_sets: &mut Informer<DaemonSet>,
    services: &mut Informer<Service>,
    client: Arc<dyn ResourceClient<DaemonSet>>,
) -> Controller<&'static str> {
    let reconciler = NodeCaDaemonSync::new(
        Arc::new(daemon_sets.lister(&config.namespace)),
        Arc::new(services.lister(&config.namespace)),
        client,
        node_ca_params(config),
    );

    let controller = Controller::new(
        "NodeCADaemonController",
        Arc::new(reconciler),
        Box::new(default_controller_rate_limiter(&config.rate_limit)),
        config.controller.clone(),
    )
    .with_cache(Arc::new(daemon_sets.handle()))
    .with_cache(Arc::new(services.handle()));

    daemon_sets.add_event_handler(controller.event_handler(WORK_QUEUE_KEY));
    services.add_event_handler(controller.event_handler(WORK_QUEUE_KEY));
    controller
}

//! Private-configuration secret controller

use super::{Controller, Reconcile, WORK_QUEUE_KEY};
use crate::cache::{Informer, NamespaceLister};
use crate::client::ResourceClient;
use crate::config::OperatorConfig;
use crate::error::Result;
use crate::resource::{apply_mutator, SecretGenerator};
use crate::storage::Driver;
use crate::workqueue::default_controller_rate_limiter;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use std::sync::Arc;
use tracing::debug;

pub struct PrivateConfigurationSync {
    secrets: Arc<dyn NamespaceLister<Secret>>,
    client: Arc<dyn ResourceClient<Secret>>,
    driver: Option<Arc<dyn Driver>>,
    namespace: String,
    name: String,
}

impl PrivateConfigurationSync {
    pub fn new(
        secrets: Arc<dyn NamespaceLister<Secret>>,
        client: Arc<dyn ResourceClient<Secret>>,
        driver: Option<Arc<dyn Driver>>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            secrets,
            client,
            driver,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl Reconcile<&'static str> for PrivateConfigurationSync {
    async fn sync(&self, _key: &&'static str) -> Result<()> {
        let generator = SecretGenerator::new(
            Arc::clone(&self.secrets),
            Arc::clone(&self.client),
            self.driver.clone(),
            &self.namespace,
            &self.name,
        );
        let changed = apply_mutator(&generator).await?;
        debug!(changed, "private configuration reconciled");
        Ok(())
    }
}

/// Wire the controller to the secret informer. Call before the informer runs.
pub fn new_image_registry_config_controller(
    config: &OperatorConfig,
    secrets: &mut Informer<Secret>,
    client: Arc<dyn ResourceClient<Secret>>,
    driver: Option<Arc<dyn Driver>>,
) -> Controller<&'static str> {
    let reconciler = PrivateConfigurationSync::new(
        Arc::new(secrets.lister(&config.namespace)),
        client,
        driver,
        &config.namespace,
        &config.private_configuration_secret,
    );

    let controller = Controller::new(
        "ImageRegistryConfigController",
        Arc::new(reconciler),
        Box::new(default_controller_rate_limiter(&config.rate_limit)),
        config.controller.clone(),
    )
    .with_cache(Arc::new(secrets.handle()));

    secrets.add_event_handler(controller.event_handler(WORK_QUEUE_KEY));
    controller
}

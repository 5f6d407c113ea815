//! node-ca daemon set
//!
//! Runs on every node and installs the registry's serving CA under
//! `/etc/docker/certs.d/<registry hostname>` so that container runtimes
//! trust the internal registry. The hostname is derived from the registry
//! Service.

use super::{common_update, Identity, Mutator};
use crate::cache::NamespaceLister;
use crate::client::ResourceClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, HostPathVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecurityContext, Service, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;
use std::sync::Arc;

const CONTAINER_NAME: &str = "node-ca";
const CERTS_DIR: &str = "/etc/docker/certs.d";

// Copies the service CA into the host's certs.d once a minute.
const SCRIPT: &str = r#"trap 'exit 0' TERM
while true; do
  dir="/etc/docker/certs.d/${REGISTRY_HOSTNAME}"
  mkdir -p "$dir"
  cp -f /var/run/secrets/kubernetes.io/serviceaccount/service-ca.crt "$dir/ca.crt"
  sleep 60 & wait $!
done
"#;

/// Names and image for the node-ca daemon set.
#[derive(Debug, Clone)]
pub struct NodeCaParams {
    pub namespace: String,
    pub name: String,
    pub registry_service: String,
    pub image: String,
    pub service_account: String,
}

pub struct NodeCaDaemonSetGenerator {
    daemon_sets: Arc<dyn NamespaceLister<DaemonSet>>,
    services: Arc<dyn NamespaceLister<Service>>,
    client: Arc<dyn ResourceClient<DaemonSet>>,
    params: NodeCaParams,
}

impl NodeCaDaemonSetGenerator {
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

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("name".to_string(), self.params.name.clone())])
    }

    fn registry_hostname(&self) -> Result<String> {
        let svc = self
            .services
            .get(&self.params.registry_service)
            .map_err(|e| {
                if e.is_not_found() {
                    Error::computation(format!(
                        "registry service {}/{} does not exist",
                        self.params.namespace, self.params.registry_service
                    ))
                } else {
                    e
                }
            })?;

        let port = svc
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| ports.first())
            .map(|p| p.port)
            .ok_or_else(|| {
                Error::computation(format!(
                    "registry service {} exposes no ports",
                    self.params.registry_service
                ))
            })?;

        Ok(format!(
            "{}.{}.svc:{}",
            self.params.registry_service, self.params.namespace, port
        ))
    }

    fn container(&self, hostname: String) -> Container {
        Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(self.params.image.clone()),
            command: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                SCRIPT.to_string(),
            ]),
            env: Some(vec![EnvVar {
                name: "REGISTRY_HOSTNAME".to_string(),
                value: Some(hostname),
                ..Default::default()
            }]),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("10m".to_string())),
                    ("memory".to_string(), Quantity("10Mi".to_string())),
                ])),
                ..Default::default()
            }),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }),
            volume_mounts: Some(vec![VolumeMount {
                name: "hosts".to_string(),
                mount_path: CERTS_DIR.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    /// Overwrite the fields this generator manages, leaving server-side
    /// defaults on `current` untouched.
    fn merge(current: &DaemonSet, desired: DaemonSet) -> DaemonSet {
        let mut merged = current.clone();
        let desired_labels = desired.metadata.labels.unwrap_or_default();
        merged
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(desired_labels);

        let Some(want) = desired.spec else {
            return merged;
        };
        let spec = merged.spec.get_or_insert_with(DaemonSetSpec::default);
        spec.selector = want.selector;

        let want_labels = want
            .template
            .metadata
            .and_then(|m| m.labels)
            .unwrap_or_default();
        spec.template
            .metadata
            .get_or_insert_with(ObjectMeta::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(want_labels);

        let want_pod = want.template.spec.unwrap_or_default();
        let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
        pod.service_account_name = want_pod.service_account_name;
        pod.priority_class_name = want_pod.priority_class_name;
        pod.node_selector = want_pod.node_selector;
        pod.tolerations = want_pod.tolerations;
        pod.volumes = want_pod.volumes;

        // The daemon set is owned: containers we do not declare are dropped.
        pod.containers = want_pod
            .containers
            .into_iter()
            .map(|c| match pod.containers.iter().find(|have| have.name == c.name) {
                Some(have) => Container {
                    image: c.image,
                    command: c.command,
                    env: c.env,
                    resources: c.resources,
                    security_context: c.security_context,
                    volume_mounts: c.volume_mounts,
                    ..have.clone()
                },
                None => c,
            })
            .collect();

        merged
    }
}

#[async_trait]
impl Mutator for NodeCaDaemonSetGenerator {
    type Object = DaemonSet;

    fn identity(&self) -> Identity {
        Identity::new("apps", "daemonsets", &self.params.namespace, &self.params.name)
    }

    async fn get(&self) -> Result<DaemonSet> {
        self.daemon_sets
            .get(&self.params.name)
            .map(|ds| (*ds).clone())
    }

    async fn fetch(&self) -> Result<DaemonSet> {
        self.client.get(&self.params.name).await
    }

    async fn expected(&self) -> Result<DaemonSet> {
        let hostname = self.registry_hostname()?;
        let labels = self.labels();

        Ok(DaemonSet {
            metadata: ObjectMeta {
                name: Some(self.params.name.clone()),
                namespace: Some(self.params.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(self.params.service_account.clone()),
                        priority_class_name: Some("system-node-critical".to_string()),
                        node_selector: Some(BTreeMap::from([(
                            "kubernetes.io/os".to_string(),
                            "linux".to_string(),
                        )])),
                        tolerations: Some(vec![Toleration {
                            operator: Some("Exists".to_string()),
                            ..Default::default()
                        }]),
                        containers: vec![self.container(hostname)],
                        volumes: Some(vec![Volume {
                            name: "hosts".to_string(),
                            host_path: Some(HostPathVolumeSource {
                                path: CERTS_DIR.to_string(),
                                type_: Some("Directory".to_string()),
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn create(&self, desired: DaemonSet) -> Result<DaemonSet> {
        self.client.create(&desired).await
    }

    async fn update(&self, current: DaemonSet) -> Result<(DaemonSet, bool)> {
        let desired = self.expected().await?;
        let merged = Self::merge(&current, desired);
        common_update(current, merged, |obj| async move {
            self.client.update(&self.params.name, &obj).await
        })
        .await
    }

    async fn delete(&self) -> Result<()> {
        self.client.delete(&self.params.name).await
    }

    fn owned(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::apply_mutator;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use std::sync::Mutex;

    const NAMESPACE: &str = "openshift-image-registry";

    struct ServiceLister(Option<Service>);

    impl NamespaceLister<Service> for ServiceLister {
        fn get(&self, name: &str) -> Result<Arc<Service>> {
            self.0
                .clone()
                .map(Arc::new)
                .ok_or_else(|| Error::NotFound(format!("core/services {NAMESPACE}/{name}")))
        }
    }

    #[derive(Default)]
    struct FakeDaemonSets {
        object: Mutex<Option<DaemonSet>>,
        writes: Mutex<usize>,
    }

    impl NamespaceLister<DaemonSet> for FakeDaemonSets {
        fn get(&self, name: &str) -> Result<Arc<DaemonSet>> {
            self.object
                .lock()
                .unwrap()
                .clone()
                .map(Arc::new)
                .ok_or_else(|| Error::NotFound(format!("apps/daemonsets {NAMESPACE}/{name}")))
        }
    }

    #[async_trait]
    impl ResourceClient<DaemonSet> for FakeDaemonSets {
        async fn get(&self, name: &str) -> Result<DaemonSet> {
            NamespaceLister::get(self, name).map(|ds| (*ds).clone())
        }

        async fn create(&self, obj: &DaemonSet) -> Result<DaemonSet> {
            *self.writes.lock().unwrap() += 1;
            *self.object.lock().unwrap() = Some(obj.clone());
            Ok(obj.clone())
        }

        async fn update(&self, _name: &str, obj: &DaemonSet) -> Result<DaemonSet> {
            *self.writes.lock().unwrap() += 1;
            *self.object.lock().unwrap() = Some(obj.clone());
            Ok(obj.clone())
        }

        async fn delete(&self, _name: &str) -> Result<()> {
            self.object.lock().unwrap().take();
            Ok(())
        }
    }

    fn registry_service(port: i32) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("image-registry".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn params() -> NodeCaParams {
        NodeCaParams {
            namespace: NAMESPACE.to_string(),
            name: "node-ca".to_string(),
            registry_service: "image-registry".to_string(),
            image: "registry.example.com/cli:latest".to_string(),
            service_account: "node-ca".to_string(),
        }
    }

    fn generator(fake: &Arc<FakeDaemonSets>, svc: Option<Service>) -> NodeCaDaemonSetGenerator {
        NodeCaDaemonSetGenerator::new(
            fake.clone(),
            Arc::new(ServiceLister(svc)),
            fake.clone(),
            params(),
        )
    }

    fn hostname_env(ds: &DaemonSet) -> Option<String> {
        ds.spec.as_ref()?.template.spec.as_ref()?.containers.first()?.env.as_ref()?
            .iter()
            .find(|e| e.name == "REGISTRY_HOSTNAME")?
            .value
            .clone()
    }

    #[tokio::test]
    async fn test_create_then_no_op() {
        let fake = Arc::new(FakeDaemonSets::default());
        let gen = generator(&fake, Some(registry_service(5000)));

        assert!(apply_mutator(&gen).await.unwrap());
        assert!(!apply_mutator(&gen).await.unwrap());
        assert_eq!(*fake.writes.lock().unwrap(), 1);

        let ds = fake.object.lock().unwrap().clone().unwrap();
        assert_eq!(
            hostname_env(&ds).as_deref(),
            Some("image-registry.openshift-image-registry.svc:5000")
        );
    }

    #[tokio::test]
    async fn test_server_defaults_do_not_trigger_update() {
        let fake = Arc::new(FakeDaemonSets::default());
        let gen = generator(&fake, Some(registry_service(5000)));
        let mut existing = gen.expected().await.unwrap();
        let spec = existing.spec.as_mut().unwrap();
        spec.revision_history_limit = Some(10);
        let pod = spec.template.spec.as_mut().unwrap();
        pod.restart_policy = Some("Always".to_string());
        pod.containers[0].termination_message_path = Some("/dev/termination-log".to_string());
        pod.containers[0].image_pull_policy = Some("IfNotPresent".to_string());
        *fake.object.lock().unwrap() = Some(existing);

        assert!(!apply_mutator(&gen).await.unwrap());
        assert_eq!(*fake.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_service_port_change_updates_daemon_set() {
        let fake = Arc::new(FakeDaemonSets::default());
        assert!(apply_mutator(&generator(&fake, Some(registry_service(5000))))
            .await
            .unwrap());

        assert!(apply_mutator(&generator(&fake, Some(registry_service(5001))))
            .await
            .unwrap());

        let ds = fake.object.lock().unwrap().clone().unwrap();
        assert_eq!(
            hostname_env(&ds).as_deref(),
            Some("image-registry.openshift-image-registry.svc:5001")
        );
    }

    #[tokio::test]
    async fn test_missing_service_is_computation_error() {
        let fake = Arc::new(FakeDaemonSets::default());

        let err = apply_mutator(&generator(&fake, None)).await.unwrap_err();

        assert!(matches!(err, Error::Computation(_)));
        assert_eq!(*fake.writes.lock().unwrap(), 0);
    }
}

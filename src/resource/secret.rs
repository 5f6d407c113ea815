//! Private-configuration secret
//!
//! Holds the storage credentials the registry reads at startup. The
//! payload is assembled from the configured storage driver.

use super::{common_update, Identity, Mutator};
use crate::cache::NamespaceLister;
use crate::client::ResourceClient;
use crate::error::{Error, Result};
use crate::storage::Driver;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct SecretGenerator {
    lister: Arc<dyn NamespaceLister<Secret>>,
    client: Arc<dyn ResourceClient<Secret>>,
    driver: Option<Arc<dyn Driver>>,
    namespace: String,
    name: String,
    owned: bool,
}

impl SecretGenerator {
    pub fn new(
        lister: Arc<dyn NamespaceLister<Secret>>,
        client: Arc<dyn ResourceClient<Secret>>,
        driver: Option<Arc<dyn Driver>>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            lister,
            client,
            driver,
            namespace: namespace.into(),
            name: name.into(),
            owned: true,
        }
    }

    /// Only add our keys to the secret instead of replacing its payload.
    pub fn merge_only(mut self) -> Self {
        self.owned = false;
        self
    }

    fn desired_data(&self) -> Result<BTreeMap<String, ByteString>> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| Error::computation("no storage driver present"))?;

        let mut data = driver.config_env()?.secret_data();
        data.extend(driver.volume_secrets()?);

        Ok(data
            .into_iter()
            .map(|(k, v)| (k, ByteString(v.into_bytes())))
            .collect())
    }

    /// `current` with its payload brought in line with `desired`.
    ///
    /// The API server drops an empty `data` map, so an empty payload is
    /// stored as `None` to keep repeated runs write-free.
    fn merge(&self, current: &Secret, desired: Secret) -> Secret {
        let mut merged = current.clone();
        let desired_data = desired.data.unwrap_or_default();

        let data = if self.owned {
            desired_data
        } else {
            let mut data = merged.data.take().unwrap_or_default();
            data.extend(desired_data);
            data
        };

        merged.data = (!data.is_empty()).then_some(data);
        merged.string_data = None;
        merged
    }
}

#[async_trait]
impl Mutator for SecretGenerator {
    type Object = Secret;

    fn identity(&self) -> Identity {
        Identity::new("", "secrets", &self.namespace, &self.name)
    }

    async fn get(&self) -> Result<Secret> {
        self.lister.get(&self.name).map(|s| (*s).clone())
    }

    async fn fetch(&self) -> Result<Secret> {
        self.client.get(&self.name).await
    }

    async fn expected(&self) -> Result<Secret> {
        let data = self.desired_data()?;
        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: (!data.is_empty()).then_some(data),
            ..Default::default()
        })
    }

    async fn create(&self, desired: Secret) -> Result<Secret> {
        self.client.create(&desired).await
    }

    async fn update(&self, current: Secret) -> Result<(Secret, bool)> {
        let desired = self.expected().await?;
        let merged = self.merge(&current, desired);
        common_update(current, merged, |obj| async move {
            self.client.update(&self.name, &obj).await
        })
        .await
    }

    async fn delete(&self) -> Result<()> {
        self.client.delete(&self.name).await
    }

    fn owned(&self) -> bool {
        self.owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockResourceClient;
    use crate::resource::apply_mutator;
    use crate::storage::{ConfigEnv, EnvVar, MockDriver};
    use std::sync::Mutex;

    const NAMESPACE: &str = "openshift-image-registry";
    const NAME: &str = "image-registry-private-configuration";

    /// Secrets store serving both the lister and the client side.
    #[derive(Default)]
    struct FakeSecrets {
        object: Mutex<Option<Secret>>,
        creates: Mutex<Vec<Secret>>,
        updates: Mutex<usize>,
    }

    impl FakeSecrets {
        fn not_found() -> Error {
            Error::NotFound(Identity::new("", "secrets", NAMESPACE, NAME).to_string())
        }
    }

    impl NamespaceLister<Secret> for FakeSecrets {
        fn get(&self, _name: &str) -> Result<Arc<Secret>> {
            self.object
                .lock()
                .unwrap()
                .clone()
                .map(Arc::new)
                .ok_or_else(Self::not_found)
        }
    }

    #[async_trait]
    impl ResourceClient<Secret> for FakeSecrets {
        async fn get(&self, _name: &str) -> Result<Secret> {
            self.object.lock().unwrap().clone().ok_or_else(Self::not_found)
        }

        async fn create(&self, obj: &Secret) -> Result<Secret> {
            self.creates.lock().unwrap().push(obj.clone());
            *self.object.lock().unwrap() = Some(obj.clone());
            Ok(obj.clone())
        }

        async fn update(&self, _name: &str, obj: &Secret) -> Result<Secret> {
            *self.updates.lock().unwrap() += 1;
            *self.object.lock().unwrap() = Some(obj.clone());
            Ok(obj.clone())
        }

        async fn delete(&self, _name: &str) -> Result<()> {
            self.object.lock().unwrap().take().map(|_| ()).ok_or_else(Self::not_found)
        }
    }

    /// Driver exporting the backend configuration verbatim as secret data.
    fn backend_driver() -> Arc<dyn Driver> {
        let mut driver = MockDriver::new();
        driver.expect_config_env().returning(|| {
            Ok(ConfigEnv(vec![
                EnvVar::secret("endpoint", "s3.example.com"),
                EnvVar::secret("bucket", "imgs"),
            ]))
        });
        driver.expect_volume_secrets().returning(|| Ok(BTreeMap::new()));
        Arc::new(driver)
    }

    fn generator(fake: &Arc<FakeSecrets>, driver: Option<Arc<dyn Driver>>) -> SecretGenerator {
        SecretGenerator::new(fake.clone(), fake.clone(), driver, NAMESPACE, NAME)
    }

    fn data(secret: &Secret) -> BTreeMap<String, String> {
        secret
            .data
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8(v.0).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_creates_secret_with_derived_pairs() {
        let fake = Arc::new(FakeSecrets::default());

        let changed = apply_mutator(&generator(&fake, Some(backend_driver()))).await.unwrap();

        assert!(changed);
        let creates = fake.creates.lock().unwrap();
        assert_eq!(creates.len(), 1);
        let expected: BTreeMap<String, String> = [
            ("bucket".to_string(), "imgs".to_string()),
            ("endpoint".to_string(), "s3.example.com".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(data(&creates[0]), expected);
        assert_eq!(creates[0].metadata.namespace.as_deref(), Some(NAMESPACE));
    }

    #[tokio::test]
    async fn test_identical_secret_is_not_written() {
        let fake = Arc::new(FakeSecrets::default());
        let gen = generator(&fake, Some(backend_driver()));
        *fake.object.lock().unwrap() = Some(gen.expected().await.unwrap());

        let changed = apply_mutator(&gen).await.unwrap();

        assert!(!changed);
        assert_eq!(*fake.updates.lock().unwrap(), 0);
        assert!(fake.creates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_driver_failure_issues_no_write() {
        let mut driver = MockDriver::new();
        driver
            .expect_config_env()
            .returning(|| Err(Error::computation("backend unavailable")));
        driver.expect_volume_secrets().never();

        let mut client = MockResourceClient::<Secret>::new();
        client.expect_create().never();
        client.expect_update().never();

        let fake = Arc::new(FakeSecrets::default());
        let gen = SecretGenerator::new(
            fake,
            Arc::new(client),
            Some(Arc::new(driver)),
            NAMESPACE,
            NAME,
        );

        let err = apply_mutator(&gen).await.unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[tokio::test]
    async fn test_missing_driver_is_computation_error() {
        let fake = Arc::new(FakeSecrets::default());

        let err = apply_mutator(&generator(&fake, None)).await.unwrap_err();

        assert!(err.to_string().contains("no storage driver present"));
        assert!(fake.creates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_owned_update_drops_foreign_keys() {
        let fake = Arc::new(FakeSecrets::default());
        let gen = generator(&fake, Some(backend_driver()));
        let mut existing = gen.expected().await.unwrap();
        existing
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert("stale".to_string(), ByteString(b"x".to_vec()));
        *fake.object.lock().unwrap() = Some(existing);

        assert!(apply_mutator(&gen).await.unwrap());

        let stored = fake.object.lock().unwrap().clone().unwrap();
        assert!(!data(&stored).contains_key("stale"));
        assert_eq!(*fake.updates.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_merge_only_update_keeps_foreign_keys() {
        let fake = Arc::new(FakeSecrets::default());
        let gen = generator(&fake, Some(backend_driver())).merge_only();
        let mut existing = gen.expected().await.unwrap();
        existing
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert("foreign".to_string(), ByteString(b"x".to_vec()));
        *fake.object.lock().unwrap() = Some(existing);

        assert!(!apply_mutator(&gen).await.unwrap());
        assert!(!gen.owned());
    }

    #[tokio::test]
    async fn test_recreated_after_external_delete() {
        let fake = Arc::new(FakeSecrets::default());
        let gen = generator(&fake, Some(backend_driver()));
        assert!(apply_mutator(&gen).await.unwrap());

        fake.object.lock().unwrap().take();

        let gen = generator(&fake, Some(backend_driver()));
        assert!(apply_mutator(&gen).await.unwrap());
        assert_eq!(fake.creates.lock().unwrap().len(), 2);
    }
}

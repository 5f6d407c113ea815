use super::{ConfigEnv, Driver, EnvVar};
use crate::config::S3StorageConfig;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// S3-compatible object storage.
pub struct S3Driver {
    config: S3StorageConfig,
}

impl S3Driver {
    pub fn new(config: S3StorageConfig) -> Self {
        Self { config }
    }
}

impl Driver for S3Driver {
    fn config_env(&self) -> Result<ConfigEnv> {
        let c = &self.config;
        if c.bucket.is_empty() {
            return Err(Error::computation("s3 storage: bucket is not set"));
        }
        let (access_key, secret_key) = match (&c.access_key, &c.secret_key) {
            (Some(a), Some(s)) if !a.is_empty() && !s.is_empty() => (a, s),
            _ => return Err(Error::computation("s3 storage: credentials are not configured")),
        };

        let mut env = vec![
            EnvVar::plain("REGISTRY_STORAGE", "s3"),
            EnvVar::plain("REGISTRY_STORAGE_S3_BUCKET", &c.bucket),
            EnvVar::plain("REGISTRY_STORAGE_S3_REGION", &c.region),
            EnvVar::plain("REGISTRY_STORAGE_S3_ENCRYPT", c.encrypt.to_string()),
        ];
        if let Some(endpoint) = &c.region_endpoint {
            env.push(EnvVar::plain("REGISTRY_STORAGE_S3_REGIONENDPOINT", endpoint));
        }
        env.push(EnvVar::secret("REGISTRY_STORAGE_S3_ACCESSKEY", access_key));
        env.push(EnvVar::secret("REGISTRY_STORAGE_S3_SECRETKEY", secret_key));

        Ok(ConfigEnv(env))
    }

    fn volume_secrets(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3StorageConfig {
        S3StorageConfig {
            bucket: "imgs".to_string(),
            region: "us-east-1".to_string(),
            region_endpoint: Some("https://s3.example.com".to_string()),
            encrypt: true,
            access_key: Some("AKIA".to_string()),
            secret_key: Some("shh".to_string()),
        }
    }

    #[test]
    fn test_config_env() {
        let env = S3Driver::new(config()).config_env().unwrap();

        let secret = env.secret_data();
        assert_eq!(secret.len(), 2);
        assert_eq!(secret["REGISTRY_STORAGE_S3_SECRETKEY"], "shh");
        assert!(env
            .plain()
            .any(|e| e.name == "REGISTRY_STORAGE_S3_REGIONENDPOINT" && e.value == "https://s3.example.com"));
    }

    #[test]
    fn test_missing_credentials_is_computation_error() {
        let mut c = config();
        c.secret_key = None;

        let err = S3Driver::new(c).config_env().unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_missing_bucket_is_computation_error() {
        let mut c = config();
        c.bucket.clear();

        assert!(S3Driver::new(c).config_env().is_err());
    }
}

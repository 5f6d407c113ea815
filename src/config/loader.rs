use super::types::OperatorConfig;
use crate::error::Result;
use config::{Config, Environment, File, Value};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    config_file: Option<String>,
    load_env: bool,
    overrides: Vec<(String, Value)>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
            overrides: Vec::new(),
        }
    }

    /// Load configuration from file
    pub fn load_from_file(mut self, path: Option<&str>) -> Self {
        self.config_file = path.map(String::from);
        self
    }

    /// Load configuration from `REGISTRY_OPERATOR__*` environment variables
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Override a single key, e.g. from a command-line flag
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.overrides.push((key.to_string(), value.into()));
        self
    }

    /// Build and validate the final configuration
    pub fn build(self) -> Result<OperatorConfig> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&OperatorConfig::default())?);

        if let Some(config_path) = &self.config_file {
            builder = builder.add_source(File::with_name(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("registry-operator").required(false))
                .add_source(File::with_name("config/registry-operator").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix("REGISTRY_OPERATOR")
                    .prefix_separator("__")
                    .separator("__"),
            );
        }

        for (key, value) in self.overrides {
            builder = builder.set_override(key, value)?;
        }

        let config: OperatorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

//! Environment configuration
//!
//! The configuration is loaded once per execution by a [`ConfigProvider`]
//! and shared read-only through the processor context. Values supplied by
//! the caller always win over values read from disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SendError};
use crate::types::Variables;

/// Environment whose variables apply to every other environment.
pub const SHARED_ENVIRONMENT: &str = "$shared";

/// Default name of the JSON configuration file.
pub const DEFAULT_CONFIG_FILE: &str = ".regionflow.json";

/// Transport settings applied by the protocol handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestConfig {
    /// Timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_unauthorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestConfig {
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    /// TLS certificates are verified unless explicitly disabled.
    pub fn rejects_unauthorized(&self) -> bool {
        self.reject_unauthorized.unwrap_or(true)
    }

    fn merge(&mut self, other: RequestConfig) {
        if other.timeout.is_some() {
            self.timeout = other.timeout;
        }
        if other.reject_unauthorized.is_some() {
            self.reject_unauthorized = other.reject_unauthorized;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.user_agent.is_some() {
            self.user_agent = other.user_agent;
        }
    }
}

/// Configuration shared by every region of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    pub request: RequestConfig,
    /// Environment name to variables, in declaration order.
    pub environments: IndexMap<String, Variables>,
    pub default_environments: Vec<String>,
}

impl EnvironmentConfig {
    pub fn builder() -> EnvironmentConfigBuilder {
        EnvironmentConfigBuilder::new()
    }

    /// Overlay `other` on top of `self`.
    ///
    /// Scalar settings from `other` win when set; environments are merged
    /// variable by variable.
    pub fn merge(&mut self, other: EnvironmentConfig) {
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        self.request.merge(other.request);
        for (name, variables) in other.environments {
            self.environments.entry(name).or_default().extend(variables);
        }
        if !other.default_environments.is_empty() {
            self.default_environments = other.default_environments;
        }
    }

    /// Names of all selectable environments.
    pub fn environment_names(&self) -> Vec<String> {
        self.environments
            .keys()
            .filter(|name| name.as_str() != SHARED_ENVIRONMENT)
            .cloned()
            .collect()
    }

    /// Variables visible in the given environments: the shared set first,
    /// then each environment in order.
    pub fn variables_for(&self, environments: &[String]) -> Variables {
        let mut variables = self
            .environments
            .get(SHARED_ENVIRONMENT)
            .cloned()
            .unwrap_or_default();
        for name in environments {
            match self.environments.get(name) {
                Some(values) => variables.extend(values.clone()),
                None => {
                    tracing::warn!(target: "regionflow::orchestrator", environment=%name, "unknown environment");
                }
            }
        }
        variables
    }
}

/// Builder for [`EnvironmentConfig`].
#[derive(Debug, Clone, Default)]
pub struct EnvironmentConfigBuilder {
    config: EnvironmentConfig,
}

impl EnvironmentConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = Some(level.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request.timeout = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn reject_unauthorized(mut self, reject: bool) -> Self {
        self.config.request.reject_unauthorized = Some(reject);
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.request.proxy = Some(proxy.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.request.user_agent = Some(user_agent.into());
        self
    }

    pub fn environment(mut self, name: impl Into<String>, variables: Variables) -> Self {
        self.config.environments.insert(name.into(), variables);
        self
    }

    pub fn default_environments<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.default_environments = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> EnvironmentConfig {
        self.config
    }
}

/// Loads the environment configuration for one execution.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// `base` carries caller supplied values, which take precedence over
    /// anything the provider reads.
    async fn load(
        &self,
        base: Option<&EnvironmentConfig>,
        root_dir: Option<&Path>,
    ) -> Result<EnvironmentConfig>;
}

/// Returns the caller configuration as is.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: EnvironmentConfig,
}

impl StaticConfigProvider {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn load(
        &self,
        base: Option<&EnvironmentConfig>,
        _root_dir: Option<&Path>,
    ) -> Result<EnvironmentConfig> {
        let mut config = self.config.clone();
        if let Some(base) = base {
            config.merge(base.clone());
        }
        Ok(config)
    }
}

/// Reads a JSON configuration file from the file's root directory.
#[derive(Debug, Clone)]
pub struct JsonFileConfigProvider {
    file_name: PathBuf,
}

impl Default for JsonFileConfigProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_FILE)
    }
}

impl JsonFileConfigProvider {
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

#[async_trait]
impl ConfigProvider for JsonFileConfigProvider {
    async fn load(
        &self,
        base: Option<&EnvironmentConfig>,
        root_dir: Option<&Path>,
    ) -> Result<EnvironmentConfig> {
        let mut config = EnvironmentConfig::default();
        if let Some(root) = root_dir {
            let path = root.join(&self.file_name);
            if tokio::fs::try_exists(&path).await? {
                let raw = tokio::fs::read_to_string(&path).await?;
                config = serde_json::from_str(&raw).map_err(|e| {
                    SendError::ConfigurationError(format!("invalid config {}: {e}", path.display()))
                })?;
                tracing::debug!(target: "regionflow::orchestrator", path=%path.display(), "loaded environment config");
            }
        }
        if let Some(base) = base {
            config.merge(base.clone());
        }
        Ok(config)
    }
}

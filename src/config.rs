//! Agent configuration
//!
//! Loaded from an optional YAML file, then overridden by `KUBEMETA_<KEY>`
//! environment variables. Unset optional keys keep their `None` value so
//! callers can tell "not configured" apart from an empty value.

use crate::{KubemetaError, Result};
use kubemeta_common::{METADATA_MAP_EXPIRE, METADATA_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "KUBEMETA_CONFIG";

const ENV_PREFIX: &str = "KUBEMETA_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Out-of-cluster credentials. In-cluster credentials are used when unset.
    pub kubernetes_kubeconfig_path: Option<PathBuf>,
    /// Namespace holding the token ConfigMap
    pub kube_resources_namespace: Option<String>,
    pub use_metadata_mapper: bool,
    /// Name of the node this agent runs on
    pub node_name: Option<String>,
    /// Map every node of the cluster instead of only the local one
    pub cluster_agent: bool,
    pub metadata_poll_interval_secs: u64,
    pub metadata_map_expire_secs: u64,
    pub api_server_timeout_secs: u64,
    pub api_server_connect_retries: u32,
    pub api_server_retry_delay_secs: u64,
    pub token_config_map: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubernetes_kubeconfig_path: None,
            kube_resources_namespace: None,
            use_metadata_mapper: true,
            node_name: None,
            cluster_agent: true,
            metadata_poll_interval_secs: METADATA_POLL_INTERVAL.as_secs(),
            metadata_map_expire_secs: METADATA_MAP_EXPIRE.as_secs(),
            api_server_timeout_secs: 5,
            api_server_connect_retries: 10,
            api_server_retry_delay_secs: 30,
            token_config_map: "kubemetatoken".to_string(),
        }
    }
}

impl Config {
    /// Load the configuration file (if any) and apply environment overrides.
    ///
    /// `path` wins over `KUBEMETA_CONFIG`; with neither, defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            KubemetaError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply overrides looked up by upper-cased key name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KUBERNETES_KUBECONFIG_PATH") {
            self.kubernetes_kubeconfig_path = non_empty(v).map(PathBuf::from);
        }
        if let Some(v) = lookup("KUBE_RESOURCES_NAMESPACE") {
            self.kube_resources_namespace = non_empty(v);
        }
        if let Some(v) = lookup("NODE_NAME") {
            self.node_name = non_empty(v);
        }
        if let Some(v) = lookup("USE_METADATA_MAPPER") {
            self.use_metadata_mapper = parse_bool("USE_METADATA_MAPPER", &v)?;
        }
        if let Some(v) = lookup("CLUSTER_AGENT") {
            self.cluster_agent = parse_bool("CLUSTER_AGENT", &v)?;
        }
        if let Some(v) = lookup("METADATA_POLL_INTERVAL_SECS") {
            self.metadata_poll_interval_secs = parse_num("METADATA_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("METADATA_MAP_EXPIRE_SECS") {
            self.metadata_map_expire_secs = parse_num("METADATA_MAP_EXPIRE_SECS", &v)?;
        }
        if let Some(v) = lookup("API_SERVER_TIMEOUT_SECS") {
            self.api_server_timeout_secs = parse_num("API_SERVER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("API_SERVER_CONNECT_RETRIES") {
            self.api_server_connect_retries = parse_num("API_SERVER_CONNECT_RETRIES", &v)?;
        }
        if let Some(v) = lookup("API_SERVER_RETRY_DELAY_SECS") {
            self.api_server_retry_delay_secs = parse_num("API_SERVER_RETRY_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("TOKEN_CONFIG_MAP") {
            self.token_config_map = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata_poll_interval_secs == 0 {
            return Err(KubemetaError::ConfigError(
                "metadata_poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.metadata_map_expire_secs == 0 {
            return Err(KubemetaError::ConfigError(
                "metadata_map_expire_secs must be greater than 0".to_string(),
            ));
        }
        if self.api_server_timeout_secs == 0 {
            return Err(KubemetaError::ConfigError(
                "api_server_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.api_server_connect_retries == 0 {
            return Err(KubemetaError::ConfigError(
                "api_server_connect_retries must be greater than 0".to_string(),
            ));
        }
        if self.token_config_map.is_empty() {
            return Err(KubemetaError::ConfigError(
                "token_config_map must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn metadata_poll_interval(&self) -> Duration {
        Duration::from_secs(self.metadata_poll_interval_secs)
    }

    pub fn metadata_map_expire(&self) -> Duration {
        Duration::from_secs(self.metadata_map_expire_secs)
    }

    pub fn api_server_timeout(&self) -> Duration {
        Duration::from_secs(self.api_server_timeout_secs)
    }

    pub fn api_server_retry_delay(&self) -> Duration {
        Duration::from_secs(self.api_server_retry_delay_secs)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(KubemetaError::ConfigError(format!(
            "{}{} must be a boolean, got {:?}",
            ENV_PREFIX, key, value
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        KubemetaError::ConfigError(format!(
            "{}{} must be a non-negative integer, got {:?}",
            ENV_PREFIX, key, value
        ))
    })
}

//! Shared metadata types for kubemeta
//!
//! This crate defines the values other agent subsystems read out of the
//! metadata cache:
//! - `MetadataMapperBundle` - per-node pod name to service names mapping
//! - `CacheKey` - structured cache key with a stable string form
//! - Cache and polling constants

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Cache namespace under which per-node bundles are stored
pub const METADATA_MAPPER_CACHE_PREFIX: &str = "KubernetesMetadataMapping";

/// How long a bundle stays visible after its last refresh
pub const METADATA_MAP_EXPIRE: Duration = Duration::from_secs(5 * 60);

/// Interval between two cluster mapping cycles
pub const METADATA_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Maps the pods of one node to the services they back.
///
/// Example: `{"services": {"web-7d9f": ["web", "web-headless"]}}`
///
/// Bundles are immutable once cached; a refresh builds a new bundle and
/// replaces the cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataMapperBundle {
    #[serde(rename = "services", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_name_to_service: BTreeMap<String, Vec<String>>,
}

impl MetadataMapperBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `pod_name` is backed by `service`, keeping insertion order
    /// and ignoring duplicates.
    pub fn add_service(&mut self, pod_name: &str, service: &str) {
        let services = self
            .pod_name_to_service
            .entry(pod_name.to_string())
            .or_default();
        if !services.iter().any(|s| s == service) {
            services.push(service.to_string());
        }
    }

    /// Services owning the given pod, if any
    pub fn services_for_pod(&self, pod_name: &str) -> Option<&[String]> {
        self.pod_name_to_service.get(pod_name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.pod_name_to_service.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pod_name_to_service.is_empty()
    }
}

/// Structured cache key.
///
/// Serializes as `"<namespace>:<resource>"`, the format other cache readers
/// expect. Build keys through this type rather than formatting strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: &'static str,
    pub resource: String,
}

impl CacheKey {
    pub fn new(namespace: &'static str, resource: impl Into<String>) -> Self {
        Self {
            namespace,
            resource: resource.into(),
        }
    }

    /// Key of the metadata bundle for `node_name`
    pub fn metadata_mapping(node_name: &str) -> Self {
        Self::new(METADATA_MAPPER_CACHE_PREFIX, node_name)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.resource)
    }
}

//! Read side of the metadata map, used by the `svcmap` command

use crate::k8s::client::ApiClient;
use crate::metadata::cache::MetadataCache;
use crate::{KubemetaError, Result};
use kubemeta_common::{CacheKey, MetadataMapperBundle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

/// Bundles found per node, with one warning per node that has none
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataMapStats {
    #[serde(rename = "Nodes")]
    pub nodes: BTreeMap<String, MetadataMapperBundle>,
    #[serde(rename = "Warnings", skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MetadataMapStats {
    fn add(&mut self, cache: &MetadataCache, node_name: &str, map_name: &str) {
        match get_metadata_map_bundle(cache, node_name) {
            Ok(bundle) => {
                self.nodes
                    .insert(node_name.to_string(), bundle.as_ref().clone());
            }
            Err(e) => self.warnings.push(format!(
                "Node {} could not be added to the {} map bundle: {}",
                node_name, map_name, e
            )),
        }
    }
}

/// Bundles of every node currently known to the API server.
///
/// Failing to list the nodes is an error; a node without a cached bundle is
/// reported as a warning.
pub async fn get_metadata_map_bundle_on_all_nodes(
    client: &ApiClient,
    cache: &MetadataCache,
) -> Result<MetadataMapStats> {
    let nodes = client.list_nodes().await.inspect_err(|e| {
        error!("Can't list nodes from the API server: {}", e);
    })?;

    let mut stats = MetadataMapStats::default();
    for node in &nodes {
        let Some(node_name) = node.metadata.name.as_deref() else {
            error!("Incorrect payload when evaluating a node for the service mapper");
            continue;
        };
        stats.add(cache, node_name, "service");
    }
    Ok(stats)
}

/// Bundle of a single node
pub fn get_metadata_map_bundle_on_node(cache: &MetadataCache, node_name: &str) -> MetadataMapStats {
    let mut stats = MetadataMapStats::default();
    stats.add(cache, node_name, "metadata");
    stats
}

fn get_metadata_map_bundle(
    cache: &MetadataCache,
    node_name: &str,
) -> Result<Arc<MetadataMapperBundle>> {
    let key = CacheKey::metadata_mapping(node_name);
    cache
        .get(&key)
        .ok_or_else(|| KubemetaError::NotFound(format!("the key {} was not found in the cache", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::k8s::api::MockClusterApi;
    use crate::metadata::cache::TtlCache;
    use k8s_openapi::api::core::v1::Node;
    use kube::api::ObjectMeta;
    use std::time::Duration;

    fn cache_with(node: &str, pod: &str, service: &str) -> MetadataCache {
        let cache = TtlCache::new();
        let mut bundle = MetadataMapperBundle::new();
        bundle.add_service(pod, service);
        cache.set(
            &CacheKey::metadata_mapping(node),
            Arc::new(bundle),
            Duration::from_secs(300),
        );
        cache
    }

    fn client(api: MockClusterApi) -> ApiClient {
        let config = Config {
            kube_resources_namespace: Some("agents".to_string()),
            ..Config::default()
        };
        ApiClient::new(Arc::new(api), &config)
    }

    fn named_node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_all_nodes_with_warnings() {
        let mut api = MockClusterApi::new();
        api.expect_list_nodes()
            .returning(|_| Ok(vec![named_node("n1"), named_node("n2"), Node::default()]));

        let cache = cache_with("n1", "p1", "svc-a");
        let stats = get_metadata_map_bundle_on_all_nodes(&client(api), &cache)
            .await
            .unwrap();

        assert_eq!(stats.nodes.len(), 1);
        assert_eq!(
            stats.warnings,
            vec![
                "Node n2 could not be added to the service map bundle: \
                 Entity not found: the key KubernetesMetadataMapping:n2 was not found in the cache"
            ]
        );

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["Nodes"]["n1"]["services"]["p1"][0], "svc-a");
        assert_eq!(json["Warnings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_node_list_failure() {
        let mut api = MockClusterApi::new();
        api.expect_list_nodes()
            .returning(|_| Err(KubemetaError::Forbidden("nodes".to_string())));

        let result = get_metadata_map_bundle_on_all_nodes(&client(api), &TtlCache::new()).await;
        assert!(matches!(result, Err(KubemetaError::Forbidden(_))));
    }

    #[test]
    fn test_single_node() {
        let cache = cache_with("n1", "p1", "svc-a");

        let found = get_metadata_map_bundle_on_node(&cache, "n1");
        assert!(found.warnings.is_empty());
        assert_eq!(
            serde_json::to_string(&found).unwrap(),
            r#"{"Nodes":{"n1":{"services":{"p1":["svc-a"]}}}}"#
        );

        let missing = get_metadata_map_bundle_on_node(&cache, "n9");
        assert!(missing.nodes.is_empty());
        assert!(missing.warnings[0].starts_with("Node n9 could not be added to the metadata map bundle"));
    }
}

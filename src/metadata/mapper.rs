//! Pod to service mapping per node
//!
//! Every poll cycle lists nodes, endpoints and pods from the API server and
//! joins them into one `MetadataMapperBundle` per node. Bundles are written
//! to the metadata cache with a fixed expiry, so a node whose join keeps
//! failing disappears from the cache once its last bundle expires.

use crate::config::Config;
use crate::k8s::client::ApiClient;
use crate::k8s::types::PodInfo;
use crate::metadata::cache::MetadataCache;
use crate::{KubemetaError, Result};
use k8s_openapi::api::core::v1::{EndpointAddress, Endpoints, Node, Pod};
use kubemeta_common::{CacheKey, MetadataMapperBundle};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Join the pods scheduled on `node_name` with the endpoints backing them.
///
/// The service name of an endpoints object is the object's own name. An
/// address is matched to a pod through its target reference when it has
/// one, otherwise through the pod IP within the endpoints' namespace.
pub fn map_services(
    node_name: &str,
    pods: &[PodInfo],
    endpoints: &[Endpoints],
) -> Result<MetadataMapperBundle> {
    if node_name.is_empty() {
        return Err(KubemetaError::Mapping {
            node: String::new(),
            reason: "empty node name".to_string(),
        });
    }

    let mut node_pods = Vec::new();
    for pod in pods.iter().filter(|pod| pod.is_on_node(node_name)) {
        let ip = match pod.ip() {
            Some(Ok(ip)) => Some(ip),
            Some(Err(e)) => {
                return Err(KubemetaError::Mapping {
                    node: node_name.to_string(),
                    reason: format!(
                        "pod {}/{} has an invalid IP {:?}: {}",
                        pod.namespace,
                        pod.name,
                        pod.pod_ip.as_deref().unwrap_or_default(),
                        e
                    ),
                });
            }
            None => None,
        };
        node_pods.push((pod, ip));
    }

    let mut bundle = MetadataMapperBundle::new();
    for endpoint in endpoints {
        let Some(service) = endpoint.metadata.name.as_deref() else {
            continue;
        };
        let namespace = endpoint.metadata.namespace.as_deref().unwrap_or("default");

        let addresses = endpoint
            .subsets
            .iter()
            .flatten()
            .flat_map(|subset| subset.addresses.iter().flatten());
        for address in addresses {
            if address
                .node_name
                .as_deref()
                .is_some_and(|addr_node| addr_node != node_name)
            {
                continue;
            }
            if let Some(pod) = find_pod(&node_pods, address, namespace) {
                bundle.add_service(&pod.name, service);
            }
        }
    }

    Ok(bundle)
}

fn find_pod<'a>(
    node_pods: &[(&'a PodInfo, Option<IpAddr>)],
    address: &EndpointAddress,
    namespace: &str,
) -> Option<&'a PodInfo> {
    if let Some(target) = address.target_ref.as_ref() {
        if target.kind.as_deref().map_or(true, |kind| kind == "Pod") {
            let name = target.name.as_deref()?;
            let target_namespace = target.namespace.as_deref().unwrap_or(namespace);
            // a pod on another node never matches by IP either
            return node_pods
                .iter()
                .find(|(pod, _)| pod.name == name && pod.namespace == target_namespace)
                .map(|(pod, _)| *pod);
        }
    }

    let ip: IpAddr = address.ip.parse().ok()?;
    node_pods
        .iter()
        .find(|(pod, pod_ip)| pod.namespace == namespace && *pod_ip == Some(ip))
        .map(|(pod, _)| *pod)
}

/// Outcome of one mapping pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingSummary {
    /// Nodes whose bundle was refreshed
    pub mapped: Vec<String>,
    /// Nodes skipped because their join failed
    pub failed: Vec<String>,
}

/// What a mapper loop refreshes on every tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingScope {
    /// Every node of the cluster
    Cluster,
    /// Only the named node, from its own pod list
    Node(String),
}

pub struct MetadataMapper {
    client: ApiClient,
    cache: MetadataCache,
    expire: Duration,
    poll_interval: Duration,
}

impl MetadataMapper {
    pub fn new(client: ApiClient, cache: MetadataCache, config: &Config) -> Self {
        Self {
            client,
            cache,
            expire: config.metadata_map_expire(),
            poll_interval: config.metadata_poll_interval(),
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Refresh the bundles of every node in the cluster.
    ///
    /// A failed list aborts the pass and leaves the cache untouched. An empty
    /// list is not an error, there is just nothing to map this time.
    pub async fn cluster_metadata_mapping(&self) -> Result<MappingSummary> {
        let nodes = self.client.list_nodes().await.inspect_err(|e| {
            error!(error = %e, "Could not collect nodes from the kube-apiserver");
        })?;
        if nodes.is_empty() {
            debug!("No node collected from the kube-apiserver");
            return Ok(MappingSummary::default());
        }

        let endpoints = self.client.list_endpoints().await.inspect_err(|e| {
            error!(error = %e, "Could not collect endpoints from the kube-apiserver");
        })?;
        if endpoints.is_empty() {
            debug!("No endpoint collected from the kube-apiserver");
            return Ok(MappingSummary::default());
        }

        let pods = self.client.list_pods().await.inspect_err(|e| {
            error!(error = %e, "Could not collect pods from the kube-apiserver");
        })?;
        if pods.is_empty() {
            debug!("No pod collected from the kube-apiserver");
            return Ok(MappingSummary::default());
        }

        Ok(self.process_kube_services(&nodes, &pods, &endpoints))
    }

    /// Refresh the bundle of a single known node from its own pod list.
    ///
    /// Used when the node computes its mapping locally instead of reading
    /// the one produced cluster-wide.
    pub async fn node_metadata_mapping(
        &self,
        node_name: &str,
        pods: &[Pod],
    ) -> Result<MappingSummary> {
        let endpoints = self.client.list_endpoints().await.inspect_err(|e| {
            error!(error = %e, "Could not collect endpoints from the API server");
        })?;
        if endpoints.is_empty() {
            debug!("No endpoints collected from the API server");
            return Ok(MappingSummary::default());
        }
        debug!("Successfully collected endpoints");

        let node = Node {
            metadata: kube::api::ObjectMeta {
                name: Some(node_name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        Ok(self.process_kube_services(&[node], pods, &endpoints))
    }

    /// Join and cache the bundle of every node. A node whose join fails is
    /// logged and skipped; its previous bundle is kept until it expires.
    pub fn process_kube_services(
        &self,
        nodes: &[Node],
        pods: &[Pod],
        endpoints: &[Endpoints],
    ) -> MappingSummary {
        debug!(
            "Identified: {} node, {} pod, {} endpoints",
            nodes.len(),
            pods.len(),
            endpoints.len()
        );
        let pods: Vec<PodInfo> = pods.iter().map(PodInfo::from_k8s_pod).collect();

        let mut summary = MappingSummary::default();
        for node in nodes {
            let node_name = node.metadata.name.clone().unwrap_or_default();
            match map_services(&node_name, &pods, endpoints) {
                Ok(bundle) => {
                    let generation = self.cache.set(
                        &CacheKey::metadata_mapping(&node_name),
                        Arc::new(bundle),
                        self.expire,
                    );
                    debug!(node = %node_name, generation, "Refreshed the metadata bundle");
                    summary.mapped.push(node_name);
                }
                Err(e) => {
                    error!(node = %node_name, error = %e, "Could not map the services");
                    summary.failed.push(node_name);
                }
            }
        }
        summary
    }

    async fn map_once(&self, scope: &MappingScope) -> Result<MappingSummary> {
        match scope {
            MappingScope::Cluster => self.cluster_metadata_mapping().await,
            MappingScope::Node(node_name) => {
                let pods = self.client.list_node_pods(node_name).await?;
                self.node_metadata_mapping(node_name, &pods).await
            }
        }
    }

    /// Map on every poll interval until `cancel` fires. The first pass
    /// starts immediately; ticks missed while a pass overruns are dropped.
    pub async fn run(&self, scope: MappingScope, cancel: CancellationToken) {
        info!(
            "Starting the metadata mapper ({:?}) every {:?}",
            scope, self.poll_interval
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.map_once(&scope) => match result {
                    Ok(summary) if !summary.failed.is_empty() => {
                        warn!(failed = ?summary.failed, "Some nodes could not be mapped");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Metadata mapping pass failed"),
                },
            }

            let purged = self.cache.purge_expired();
            if purged > 0 {
                debug!("Purged {} expired metadata bundles", purged);
            }
        }

        info!("Metadata mapper stopped");
    }
}

//! Control-plane access
//!
//! `ClusterApi` is the read/write surface the agent needs from the Kubernetes
//! API server. `KubeClusterApi` implements it over `kube::Client`; tests
//! substitute the generated `MockClusterApi`.

use crate::{KubemetaError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ComponentStatus, ConfigMap, Endpoints, Event, Node, Pod, Service,
};
use kube::api::{ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Page size used when a list call does not set its own cap
const LIST_PAGE_SIZE: u32 = 500;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Git version reported by the API server; may be empty while the
    /// server is still coming up.
    async fn server_version(&self) -> Result<String>;

    async fn list_nodes(&self, lp: &ListParams) -> Result<Vec<Node>>;

    /// Pods of all namespaces
    async fn list_pods(&self, lp: &ListParams) -> Result<Vec<Pod>>;

    /// Endpoints of all namespaces
    async fn list_endpoints(&self, lp: &ListParams) -> Result<Vec<Endpoints>>;

    /// Services of all namespaces
    async fn list_services(&self, lp: &ListParams) -> Result<Vec<Service>>;

    /// Events of all namespaces
    async fn list_events(&self, lp: &ListParams) -> Result<Vec<Event>>;

    async fn list_component_statuses(&self, lp: &ListParams) -> Result<Vec<ComponentStatus>>;

    async fn get_node(&self, name: &str) -> Result<Node>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;

    async fn replace_config_map(&self, namespace: &str, config_map: ConfigMap)
        -> Result<ConfigMap>;
}

/// Builds a connected `ClusterApi`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApiProvider: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ClusterApi>>;
}

/// Builds clients from a kubeconfig file when one is configured, and from the
/// pod's service account otherwise.
#[derive(Debug, Clone)]
pub struct KubeClusterApiProvider {
    kubeconfig_path: Option<PathBuf>,
    timeout: Duration,
}

impl KubeClusterApiProvider {
    pub fn new(kubeconfig_path: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            kubeconfig_path,
            timeout,
        }
    }

    async fn kube_config(&self) -> Result<kube::Config> {
        match &self.kubeconfig_path {
            Some(path) => {
                debug!(path = %path.display(), "Loading Kubernetes config from kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    KubemetaError::KubernetesError(format!(
                        "Failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        KubemetaError::KubernetesError(format!(
                            "Failed to load kubeconfig {}: {}",
                            path.display(),
                            e
                        ))
                    })
            }
            None => {
                debug!("Loading Kubernetes config from the service account");
                kube::Config::incluster().map_err(|e| {
                    KubemetaError::KubernetesError(format!(
                        "Failed to load in-cluster config: {}",
                        e
                    ))
                })
            }
        }
    }
}

#[async_trait]
impl ClusterApiProvider for KubeClusterApiProvider {
    async fn connect(&self) -> Result<Arc<dyn ClusterApi>> {
        let mut config = self.kube_config().await?;
        config.connect_timeout = Some(self.timeout);
        config.read_timeout = Some(self.timeout);

        let client = Client::try_from(config).map_err(|e| {
            KubemetaError::KubernetesError(format!("Failed to create K8s client: {}", e))
        })?;

        Ok(Arc::new(KubeClusterApi::new(client)))
    }
}

/// `ClusterApi` over a live `kube::Client`
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn server_version(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| remote_error("get server version", e))?;
        Ok(info.git_version)
    }

    async fn list_nodes(&self, lp: &ListParams) -> Result<Vec<Node>> {
        list_all(Api::all(self.client.clone()), lp, "nodes").await
    }

    async fn list_pods(&self, lp: &ListParams) -> Result<Vec<Pod>> {
        list_all(Api::all(self.client.clone()), lp, "pods").await
    }

    async fn list_endpoints(&self, lp: &ListParams) -> Result<Vec<Endpoints>> {
        list_all(Api::all(self.client.clone()), lp, "endpoints").await
    }

    async fn list_services(&self, lp: &ListParams) -> Result<Vec<Service>> {
        list_all(Api::all(self.client.clone()), lp, "services").await
    }

    async fn list_events(&self, lp: &ListParams) -> Result<Vec<Event>> {
        list_all(Api::all(self.client.clone()), lp, "events").await
    }

    async fn list_component_statuses(&self, lp: &ListParams) -> Result<Vec<ComponentStatus>> {
        list_all(Api::all(self.client.clone()), lp, "component statuses").await
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes
            .get(name)
            .await
            .map_err(|e| remote_error(&format!("get node {}", name), e))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        config_maps
            .get(name)
            .await
            .map_err(|e| remote_error(&format!("get ConfigMap {}/{}", namespace, name), e))
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: ConfigMap,
    ) -> Result<ConfigMap> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        config_maps
            .replace(&name, &PostParams::default(), &config_map)
            .await
            .map_err(|e| remote_error(&format!("update ConfigMap {}/{}", namespace, name), e))
    }
}

/// List every object matching `lp`.
///
/// A list with an explicit `limit` is a single capped request. Otherwise the
/// collection is read page by page until the server stops returning a
/// continue token.
async fn list_all<K>(api: Api<K>, lp: &ListParams, what: &str) -> Result<Vec<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    if lp.limit.is_some() {
        let list = api
            .list(lp)
            .await
            .map_err(|e| remote_error(&format!("list {}", what), e))?;
        return Ok(list.items);
    }

    let mut items = Vec::new();
    let mut params = lp.clone().limit(LIST_PAGE_SIZE);
    loop {
        let page = api
            .list(&params)
            .await
            .map_err(|e| remote_error(&format!("list {}", what), e))?;
        items.extend(page.items);

        match page.metadata.continue_ {
            Some(token) if !token.is_empty() => params = params.continue_token(&token),
            _ => break,
        }
    }

    debug!("Listed {} {}", items.len(), what);
    Ok(items)
}

fn remote_error(action: &str, err: kube::Error) -> KubemetaError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => {
            KubemetaError::NotFound(format!("{}: {}", action, resp.message))
        }
        kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => {
            KubemetaError::Forbidden(format!("{}: {}", action, resp.message))
        }
        other => KubemetaError::KubernetesError(format!("Failed to {}: {}", action, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Reason".to_string(),
            code,
        })
    }

    #[test]
    fn test_remote_error_mapping() {
        assert!(matches!(
            remote_error("get node n1", api_error(404)),
            KubemetaError::NotFound(_)
        ));
        assert!(matches!(
            remote_error("list events", api_error(403)),
            KubemetaError::Forbidden(_)
        ));

        let err = remote_error("list pods", api_error(500));
        assert!(matches!(err, KubemetaError::KubernetesError(_)));
        assert!(err.to_string().contains("list pods"));
        assert!(err.is_retryable());
    }
}

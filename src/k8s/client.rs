use crate::config::Config;
use crate::k8s::api::{ClusterApi, ClusterApiProvider, KubeClusterApiProvider};
use crate::k8s::auth::check_resources_auth;
use crate::k8s::namespace::get_resources_namespace;
use crate::k8s::retry::{Retrier, RetryPolicy, RetryStatus};
use crate::token::TokenStore;
use crate::{KubemetaError, Result};
use k8s_openapi::api::core::v1::{ComponentStatus, Endpoints, Node, Pod};
use kube::api::ListParams;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Authenticated access to the API server endpoints used by the agent.
///
/// Obtained from a `Connector`; cloning is cheap and clones share the
/// underlying client.
#[derive(Clone)]
pub struct ApiClient {
    api: Arc<dyn ClusterApi>,
    timeout_secs: u32,
    namespace: String,
    token_config_map: String,
}

impl ApiClient {
    pub fn new(api: Arc<dyn ClusterApi>, config: &Config) -> Self {
        Self {
            api,
            timeout_secs: u32::try_from(config.api_server_timeout_secs).unwrap_or(u32::MAX),
            namespace: get_resources_namespace(config),
            token_config_map: config.token_config_map.clone(),
        }
    }

    /// Namespace of the agent's own resources
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn list_params(&self) -> ListParams {
        ListParams::default().timeout(self.timeout_secs)
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.api.list_nodes(&self.list_params()).await
    }

    pub async fn list_endpoints(&self) -> Result<Vec<Endpoints>> {
        self.api.list_endpoints(&self.list_params()).await
    }

    pub async fn list_pods(&self) -> Result<Vec<Pod>> {
        self.api.list_pods(&self.list_params()).await
    }

    /// Pods scheduled on `node_name`
    pub async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>> {
        let lp = self
            .list_params()
            .fields(&format!("spec.nodeName={}", node_name));
        self.api.list_pods(&lp).await
    }

    /// Labels attached to the given node
    pub async fn node_labels(&self, node_name: &str) -> Result<BTreeMap<String, String>> {
        let node = self.api.get_node(node_name).await?;
        Ok(node.metadata.labels.unwrap_or_default())
    }

    pub async fn component_statuses(&self) -> Result<Vec<ComponentStatus>> {
        self.api.list_component_statuses(&self.list_params()).await
    }

    pub fn token_store(&self) -> TokenStore {
        TokenStore::new(
            self.api.clone(),
            self.namespace.clone(),
            self.token_config_map.clone(),
        )
    }
}

/// Builds the `ApiClient` once, retrying while the API server is not ready.
///
/// Each attempt creates the underlying client if needed, checks that the API
/// server reports a version, and runs the authorization check. Permission
/// failures end the retries immediately.
pub struct Connector {
    config: Config,
    provider: Box<dyn ClusterApiProvider>,
    retrier: Retrier,
    api: OnceLock<Arc<dyn ClusterApi>>,
    client: OnceLock<ApiClient>,
}

impl Connector {
    pub fn new(config: Config) -> Self {
        let provider = KubeClusterApiProvider::new(
            config.kubernetes_kubeconfig_path.clone(),
            config.api_server_timeout(),
        );
        Self::with_provider(config, Box::new(provider))
    }

    pub fn with_provider(config: Config, provider: Box<dyn ClusterApiProvider>) -> Self {
        let retrier = Retrier::new(RetryPolicy {
            name: "apiserver".to_string(),
            max_attempts: config.api_server_connect_retries,
            delay: config.api_server_retry_delay(),
        });
        Self {
            config,
            provider,
            retrier,
            api: OnceLock::new(),
            client: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn status(&self) -> RetryStatus {
        self.retrier.status().await
    }

    /// Return the shared client, making at most one connection attempt.
    ///
    /// `NotReady` and `RetryLater` errors mean the caller should try again
    /// later; `RetriesExhausted` and denied permissions are final.
    pub async fn get_client(&self) -> Result<ApiClient> {
        if let Some(client) = self.client.get() {
            return Ok(client.clone());
        }

        self.retrier
            .trigger_retry(|| self.connect())
            .await
            .inspect_err(|e| debug!(error = %e, "API client init error"))?;

        self.client.get().cloned().ok_or_else(|| {
            KubemetaError::NotReady("API client was not initialized".to_string())
        })
    }

    /// Keep calling `get_client` until it succeeds, fails for good, or
    /// `cancel` fires.
    pub async fn wait_for_client(&self, cancel: &CancellationToken) -> Result<ApiClient> {
        loop {
            let delay = match self.get_client().await {
                Ok(client) => return Ok(client),
                Err(KubemetaError::RetryLater { remaining, .. }) => remaining,
                Err(e) if e.is_retryable() => self.retrier.policy().delay,
                Err(e) => return Err(e),
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(KubemetaError::NotReady(
                        "connection to the API server cancelled".to_string(),
                    ));
                }
                _ = tokio::time::sleep(delay.max(Duration::from_millis(1))) => {}
            }
        }
    }

    async fn connect(&self) -> Result<()> {
        let api = match self.api.get() {
            Some(api) => api.clone(),
            None => {
                let api = self.provider.connect().await.inspect_err(|e| {
                    error!(error = %e, "Not able to set up a client for the API server")
                })?;
                self.api.get_or_init(|| api).clone()
            }
        };

        let version = match api.server_version().await {
            Ok(version) if !version.is_empty() => version,
            Ok(_) => {
                debug!("Cannot retrieve the version of the API server at the moment, retrying...");
                return Err(KubemetaError::NotReady(
                    "empty version response from the API server".to_string(),
                ));
            }
            Err(e @ KubemetaError::Forbidden(_)) => {
                error!(error = %e, "Not allowed to read the version of the API server");
                return Err(e);
            }
            Err(e) => {
                debug!(error = %e, "Cannot retrieve the version of the API server at the moment, retrying...");
                return Err(KubemetaError::NotReady(format!(
                    "cannot retrieve the API server version: {}",
                    e
                )));
            }
        };
        info!("Connected to kubernetes apiserver, version {}", version);

        check_resources_auth(api.as_ref(), self.config.use_metadata_mapper).await?;

        let _ = self.client.set(ApiClient::new(api, &self.config));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::api::{MockClusterApi, MockClusterApiProvider};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(max_attempts: u32, delay_secs: u64) -> Config {
        Config {
            api_server_connect_retries: max_attempts,
            api_server_retry_delay_secs: delay_secs,
            kube_resources_namespace: Some("agents".to_string()),
            ..Config::default()
        }
    }

    fn authorized(api: &mut MockClusterApi) {
        api.expect_list_events().returning(|_| Ok(vec![]));
        api.expect_list_services().returning(|_| Ok(vec![]));
        api.expect_list_pods().returning(|_| Ok(vec![]));
        api.expect_list_nodes().returning(|_| Ok(vec![]));
    }

    fn provider_for(api: MockClusterApi) -> Box<dyn ClusterApiProvider> {
        let api: Arc<dyn ClusterApi> = Arc::new(api);
        let mut provider = MockClusterApiProvider::new();
        provider
            .expect_connect()
            .times(1)
            .returning(move || Ok(api.clone()));
        Box::new(provider)
    }

    #[tokio::test]
    async fn test_connects_once() {
        let mut api = MockClusterApi::new();
        api.expect_server_version()
            .times(1)
            .returning(|| Ok("v1.30.2".to_string()));
        authorized(&mut api);

        let connector = Connector::with_provider(test_config(10, 0), provider_for(api));
        let client = connector.get_client().await.unwrap();
        assert_eq!(client.namespace(), "agents");

        connector.get_client().await.unwrap();
        assert_eq!(connector.status().await, RetryStatus::Ok);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let mut api = MockClusterApi::new();
        api.expect_server_version()
            .times(1)
            .returning(|| Ok("v1.30.2".to_string()));
        authorized(&mut api);

        let connector = Connector::with_provider(test_config(10, 0), provider_for(api));
        let (a, b) = tokio::join!(connector.get_client(), connector.get_client());
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_not_ready_exhausts_retries() {
        let mut api = MockClusterApi::new();
        api.expect_server_version()
            .times(10)
            .returning(|| Ok(String::new()));

        let connector = Connector::with_provider(test_config(10, 0), provider_for(api));
        for _ in 0..10 {
            let err = connector.get_client().await.err().unwrap();
            assert!(matches!(err, KubemetaError::NotReady(_)), "{err}");
        }

        for _ in 0..3 {
            let err = connector.get_client().await.err().unwrap();
            match err {
                KubemetaError::RetriesExhausted {
                    attempts,
                    last_error,
                    ..
                } => {
                    assert_eq!(attempts, 10);
                    assert!(last_error.contains("empty version response"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(connector.status().await, RetryStatus::PermaFail);
    }

    #[tokio::test]
    async fn test_permission_denied_is_not_retried() {
        let mut api = MockClusterApi::new();
        api.expect_server_version()
            .times(1)
            .returning(|| Ok("v1.30.2".to_string()));
        api.expect_list_events()
            .times(1)
            .returning(|_| Err(KubemetaError::Forbidden("events".to_string())));

        let config = Config {
            use_metadata_mapper: false,
            ..test_config(10, 0)
        };
        let connector = Connector::with_provider(config, provider_for(api));

        let err = connector.get_client().await.err().unwrap();
        assert!(matches!(err, KubemetaError::ResourcesAuth(_)));

        let err = connector.get_client().await.err().unwrap();
        assert!(matches!(
            err,
            KubemetaError::RetriesExhausted { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_not_retried() {
        let mut api = MockClusterApi::new();
        api.expect_server_version()
            .times(1)
            .returning(|| Err(KubemetaError::Forbidden("Unauthorized".to_string())));
        api.expect_list_events().times(0);

        let connector = Connector::with_provider(test_config(10, 0), provider_for(api));

        let err = connector.get_client().await.err().unwrap();
        assert!(matches!(err, KubemetaError::Forbidden(_)), "{err}");

        let err = connector.get_client().await.err().unwrap();
        assert!(matches!(
            err,
            KubemetaError::RetriesExhausted { attempts: 1, .. }
        ));
        assert_eq!(connector.status().await, RetryStatus::PermaFail);
    }

    #[tokio::test]
    async fn test_transient_auth_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut api = MockClusterApi::new();
        api.expect_server_version()
            .times(2)
            .returning(|| Ok("v1.30.2".to_string()));
        api.expect_list_events().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(KubemetaError::KubernetesError(
                    "503 Service Unavailable".to_string(),
                ))
            } else {
                Ok(vec![])
            }
        });

        let config = Config {
            use_metadata_mapper: false,
            ..test_config(10, 0)
        };
        let connector = Connector::with_provider(config, provider_for(api));

        let err = connector.get_client().await.err().unwrap();
        assert!(matches!(err, KubemetaError::ResourcesAuth(_)), "{err}");
        assert!(err.is_retryable());
        assert_eq!(connector.status().await, RetryStatus::FailWillRetry);

        let client = connector.get_client().await.unwrap();
        assert_eq!(client.namespace(), "agents");
        assert_eq!(connector.status().await, RetryStatus::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut provider = MockClusterApiProvider::new();
        let counter = calls.clone();
        provider.expect_connect().times(2).returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(KubemetaError::KubernetesError("no route to host".to_string()))
        });

        let connector = Connector::with_provider(test_config(2, 0), Box::new(provider));
        assert!(connector.get_client().await.is_err());
        assert!(connector.get_client().await.is_err());
        assert!(matches!(
            connector.get_client().await.err().unwrap(),
            KubemetaError::RetriesExhausted { attempts: 2, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_client_retries_until_ready() {
        let versions = Arc::new(AtomicU32::new(0));
        let counter = versions.clone();
        let mut api = MockClusterApi::new();
        api.expect_server_version().times(3).returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(String::new())
            } else {
                Ok("v1.30.2".to_string())
            }
        });
        authorized(&mut api);

        let connector = Connector::with_provider(test_config(10, 30), provider_for(api));
        let client = connector
            .wait_for_client(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(client.namespace(), "agents");
        assert_eq!(versions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_client_cancelled() {
        let mut api = MockClusterApi::new();
        api.expect_server_version().returning(|| Ok(String::new()));

        let connector = Connector::with_provider(test_config(10, 30), provider_for(api));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = connector.wait_for_client(&cancel).await.err().unwrap();
        assert!(matches!(err, KubemetaError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_node_labels_and_field_selector() {
        use k8s_openapi::api::core::v1::Node;
        use kube::api::ObjectMeta;

        let mut api = MockClusterApi::new();
        api.expect_get_node()
            .withf(|name| name == "n1")
            .returning(|_| {
                Ok(Node {
                    metadata: ObjectMeta {
                        name: Some("n1".to_string()),
                        labels: Some(
                            [("zone".to_string(), "eu-1".to_string())]
                                .into_iter()
                                .collect(),
                        ),
                        ..Default::default()
                    },
                    ..Default::default()
                })
            });
        api.expect_list_pods()
            .withf(|lp| {
                lp.field_selector.as_deref() == Some("spec.nodeName=n1") && lp.timeout == Some(5)
            })
            .returning(|_| Ok(vec![]));

        let client = ApiClient::new(Arc::new(api), &test_config(1, 0));
        let labels = client.node_labels("n1").await.unwrap();
        assert_eq!(labels.get("zone").map(String::as_str), Some("eu-1"));
        assert!(client.list_node_pods("n1").await.unwrap().is_empty());
    }
}

use k8s_openapi::api::core::v1::Pod;
use std::net::{AddrParseError, IpAddr};

/// The parts of a pod the metadata mapper joins on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: Option<String>,
    pub pod_ip: Option<String>,
}

impl PodInfo {
    pub fn from_k8s_pod(pod: &Pod) -> Self {
        let metadata = &pod.metadata;
        let spec = pod.spec.as_ref();
        let status = pod.status.as_ref();

        Self {
            name: metadata.name.clone().unwrap_or_default(),
            namespace: metadata
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            node_name: spec.and_then(|s| s.node_name.clone()),
            pod_ip: status
                .and_then(|s| s.pod_ip.clone())
                .filter(|ip| !ip.is_empty()),
        }
    }

    pub fn is_on_node(&self, node_name: &str) -> bool {
        self.node_name.as_deref() == Some(node_name)
    }

    /// The pod IP, parsed. `None` while the pod has no IP assigned.
    pub fn ip(&self) -> Option<Result<IpAddr, AddrParseError>> {
        self.pod_ip.as_deref().map(str::parse)
    }
}

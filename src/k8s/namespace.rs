use crate::config::Config;
use std::path::Path;
use tracing::{debug, error};

pub const SERVICE_ACCOUNT_NAMESPACE_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespace of the resources owned by the agent (token ConfigMap, events).
///
/// Uses `kube_resources_namespace` when configured, then the namespace of the
/// pod's service account, then `default`.
pub fn get_resources_namespace(config: &Config) -> String {
    resolve_namespace(
        config.kube_resources_namespace.as_deref(),
        Path::new(SERVICE_ACCOUNT_NAMESPACE_PATH),
    )
}

fn resolve_namespace(configured: Option<&str>, service_account_path: &Path) -> String {
    if let Some(namespace) = configured.filter(|ns| !ns.is_empty()) {
        return namespace.to_string();
    }

    debug!("No configured namespace for the resources, fetching from the service account");
    match std::fs::read_to_string(service_account_path) {
        Ok(namespace) if !namespace.trim().is_empty() => namespace.trim().to_string(),
        Ok(_) => {
            error!(
                "Service account namespace file {} is empty, using {}",
                service_account_path.display(),
                DEFAULT_NAMESPACE
            );
            DEFAULT_NAMESPACE.to_string()
        }
        Err(e) => {
            error!(
                "There was an error fetching the namespace from {}: {}, using {}",
                service_account_path.display(),
                e,
                DEFAULT_NAMESPACE
            );
            DEFAULT_NAMESPACE.to_string()
        }
    }
}

//! Authorization check run once after connecting
//!
//! Lists a single object of every resource kind the agent depends on so that
//! missing RBAC permissions are reported at startup, all at once.

use crate::error::{ResourceAuthErrors, ResourceKind};
use crate::k8s::api::ClusterApi;
use crate::Result;
use kube::api::ListParams;
use tracing::debug;

/// Server-side timeout of each list request
const RESOURCE_TIMEOUT_SECS: u32 = 2;

/// Check that the agent may read the resources it needs.
///
/// Events are always required. Services, pods and nodes are only required
/// when metadata mapping is enabled. Every list runs even when an earlier
/// one failed.
pub async fn check_resources_auth(api: &dyn ClusterApi, use_metadata_mapper: bool) -> Result<()> {
    let lp = ListParams::default()
        .limit(1)
        .timeout(RESOURCE_TIMEOUT_SECS);
    let mut errors = ResourceAuthErrors::default();

    if let Err(e) = api.list_events(&lp).await {
        errors.push(ResourceKind::Event, e);
    }

    if use_metadata_mapper {
        if let Err(e) = api.list_services(&lp).await {
            errors.push(ResourceKind::Service, e);
        }
        if let Err(e) = api.list_pods(&lp).await {
            errors.push(ResourceKind::Pod, e);
        }
        if let Err(e) = api.list_nodes(&lp).await {
            errors.push(ResourceKind::Node, e);
        }
    }

    if !errors.is_empty() {
        return Err(errors.into());
    }

    if use_metadata_mapper {
        debug!("Could successfully collect Pods, Nodes, Services and Events");
    } else {
        debug!("Could successfully collect Events");
    }
    Ok(())
}

//! Agent main loop

use crate::node::resolve_node_name;
use anyhow::{Context, Result};
use kubemeta::config::Config;
use kubemeta::k8s::Connector;
use kubemeta::metadata::{MappingScope, MetadataCache, MetadataMapper};
use log::info;
use tokio_util::sync::CancellationToken;

/// Run the metadata mapper until `cancel` fires.
///
/// Cluster agents map every node; other agents map only their own node.
pub async fn run(config: Config, cache: MetadataCache, cancel: CancellationToken) -> Result<()> {
    if !config.use_metadata_mapper {
        info!("Metadata mapping is disabled, idling until shutdown");
        cancel.cancelled().await;
        return Ok(());
    }

    let scope = if config.cluster_agent {
        MappingScope::Cluster
    } else {
        MappingScope::Node(resolve_node_name(&config)?)
    };

    let connector = Connector::new(config.clone());
    let client = match connector.wait_for_client(&cancel).await {
        Ok(client) => client,
        Err(_) if cancel.is_cancelled() => {
            info!("Shutdown requested before the API server was reachable");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to connect to the API server"),
    };
    info!(
        "Connected to the API server, agent resources live in namespace {}",
        client.namespace()
    );

    let mapper = MetadataMapper::new(client, cache, &config);
    mapper.run(scope, cancel).await;
    Ok(())
}

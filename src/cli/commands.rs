use crate::cli::output::{
    render_component_statuses, render_labels, render_stats, render_token, ComponentHealth,
    TokenView,
};
use crate::cli::{Commands, OutputFormat, TokenAction};
use crate::config::Config;
use crate::k8s::client::{ApiClient, Connector};
use crate::k8s::namespace::get_resources_namespace;
use crate::metadata::{
    get_metadata_map_bundle_on_all_nodes, get_metadata_map_bundle_on_node, MetadataCache,
    MetadataMapper,
};
use crate::{KubemetaError, Result};
use std::time::Duration;
use tracing::{info, warn};

pub async fn handle_command(command: Commands, config: Config, format: OutputFormat) -> Result<()> {
    let out = match command {
        Commands::Svcmap { node } => handle_svcmap(config, node, format).await?,
        Commands::NodeLabels { node } => {
            let client = connect(config).await?;
            render_labels(&client.node_labels(&node).await?, format)?
        }
        Commands::ComponentStatuses => {
            let client = connect(config).await?;
            let components: Vec<ComponentHealth> = client
                .component_statuses()
                .await?
                .iter()
                .map(ComponentHealth::from_k8s)
                .collect();
            render_component_statuses(&components, format)?
        }
        Commands::Namespace => format!("{}\n", get_resources_namespace(&config)),
        Commands::Token { action } => handle_token(config, action, format).await?,
    };
    print!("{}", out);
    Ok(())
}

async fn connect(config: Config) -> Result<ApiClient> {
    Connector::new(config).get_client().await
}

async fn handle_svcmap(config: Config, node: Option<String>, format: OutputFormat) -> Result<String> {
    info!("Service map requested");
    let client = connect(config.clone()).await?;

    // one mapping pass into a local cache, the agent's cache lives in another process
    let cache = MetadataCache::new();
    let mapper = MetadataMapper::new(client.clone(), cache.clone(), &config);
    let summary = mapper.cluster_metadata_mapping().await?;
    if !summary.failed.is_empty() {
        warn!("Could not map the services of {:?}", summary.failed);
    }

    let stats = match node {
        Some(node) => get_metadata_map_bundle_on_node(&cache, &node),
        None => get_metadata_map_bundle_on_all_nodes(&client, &cache).await?,
    };
    render_stats(&stats, format)
}

async fn handle_token(config: Config, action: TokenAction, format: OutputFormat) -> Result<String> {
    let store = connect(config).await?.token_store();
    match action {
        TokenAction::Get { name, max_age_secs } => {
            let view = match store.get_token(&name, Duration::from_secs(max_age_secs)).await {
                Ok(value) => TokenView {
                    name,
                    value,
                    outdated: false,
                },
                Err(KubemetaError::TokenOutdated { name, value }) => TokenView {
                    name,
                    value,
                    outdated: true,
                },
                Err(e) => return Err(e),
            };
            render_token(&view, format)
        }
        TokenAction::Set { name, value } => {
            store.update_token(&name, &value).await?;
            info!(
                "Updated {} in the ConfigMap {}/{}",
                name,
                store.namespace(),
                store.config_map()
            );
            Ok(String::new())
        }
    }
}

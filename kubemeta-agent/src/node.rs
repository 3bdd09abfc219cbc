//! Name of the node the agent runs on

use anyhow::{bail, Result};
use kubemeta::config::Config;

/// Set through the downward API in the DaemonSet manifest
pub const NODE_NAME_ENV: &str = "KUBERNETES_NODE_NAME";

/// The configured node name, then `KUBERNETES_NODE_NAME`, then the hostname
pub fn resolve_node_name(config: &Config) -> Result<String> {
    resolve(
        config.node_name.as_deref(),
        std::env::var(NODE_NAME_ENV).ok(),
        || {
            hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string())
        },
    )
}

fn resolve<F>(configured: Option<&str>, from_env: Option<String>, hostname: F) -> Result<String>
where
    F: FnOnce() -> Option<String>,
{
    if let Some(name) = configured.filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }
    if let Some(name) = from_env.filter(|n| !n.is_empty()) {
        return Ok(name);
    }
    match hostname().filter(|n| !n.is_empty()) {
        Some(name) => Ok(name),
        None => bail!(
            "could not determine the node name, set node_name or {}",
            NODE_NAME_ENV
        ),
    }
}

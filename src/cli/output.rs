use crate::cli::OutputFormat;
use crate::metadata::MetadataMapStats;
use crate::Result;
use k8s_openapi::api::core::v1::ComponentStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Health of one control plane component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    pub message: String,
}

impl ComponentHealth {
    pub fn from_k8s(component: &ComponentStatus) -> Self {
        let healthy = component
            .conditions
            .iter()
            .flatten()
            .find(|c| c.type_ == "Healthy");

        Self {
            name: component.metadata.name.clone().unwrap_or_default(),
            status: match healthy.map(|c| c.status.as_str()) {
                Some("True") => "Healthy".to_string(),
                Some(_) => "Unhealthy".to_string(),
                None => "Unknown".to_string(),
            },
            message: healthy
                .and_then(|c| c.error.clone().or_else(|| c.message.clone()))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenView {
    pub name: String,
    pub value: String,
    pub outdated: bool,
}

fn structured<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<Option<String>> {
    match format {
        OutputFormat::Json => Ok(Some(serde_json::to_string_pretty(value)?)),
        OutputFormat::Yaml => Ok(Some(serde_yaml::to_string(value)?)),
        OutputFormat::Text => Ok(None),
    }
}

pub fn render_stats(stats: &MetadataMapStats, format: OutputFormat) -> Result<String> {
    if let Some(out) = structured(stats, format)? {
        return Ok(out);
    }

    let mut out = String::new();
    if stats.nodes.is_empty() {
        out.push_str("No metadata map bundle found.\n");
    } else {
        let _ = writeln!(out, "{:<30} {:<40} SERVICES", "NODE", "POD");
        let _ = writeln!(out, "{}", "-".repeat(90));
        for (node, bundle) in &stats.nodes {
            if bundle.is_empty() {
                let _ = writeln!(out, "{:<30} {:<40} -", node, "-");
            }
            for (pod, services) in &bundle.pod_name_to_service {
                let _ = writeln!(out, "{:<30} {:<40} {}", node, pod, services.join(", "));
            }
        }
    }

    if !stats.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for warning in &stats.warnings {
            let _ = writeln!(out, "  {}", warning);
        }
    }
    Ok(out)
}

pub fn render_labels(labels: &BTreeMap<String, String>, format: OutputFormat) -> Result<String> {
    if let Some(out) = structured(labels, format)? {
        return Ok(out);
    }

    let mut out = String::new();
    for (key, value) in labels {
        let _ = writeln!(out, "{}={}", key, value);
    }
    Ok(out)
}

pub fn render_component_statuses(
    components: &[ComponentHealth],
    format: OutputFormat,
) -> Result<String> {
    if let Some(out) = structured(components, format)? {
        return Ok(out);
    }

    let mut out = String::new();
    let _ = writeln!(out, "{:<30} {:<10} MESSAGE", "NAME", "STATUS");
    for component in components {
        let _ = writeln!(
            out,
            "{:<30} {:<10} {}",
            component.name, component.status, component.message
        );
    }
    Ok(out)
}

pub fn render_token(token: &TokenView, format: OutputFormat) -> Result<String> {
    if let Some(out) = structured(token, format)? {
        return Ok(out);
    }

    if token.outdated {
        Ok(format!("{} (outdated)\n", token.value))
    } else {
        Ok(format!("{}\n", token.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ComponentCondition;
    use kube::api::ObjectMeta;
    use kubemeta_common::MetadataMapperBundle;

    fn stats() -> MetadataMapStats {
        let mut bundle = MetadataMapperBundle::new();
        bundle.add_service("p1", "svc-a");
        bundle.add_service("p1", "svc-b");
        MetadataMapStats {
            nodes: [("n1".to_string(), bundle)].into_iter().collect(),
            warnings: vec!["Node n2 could not be added".to_string()],
        }
    }

    #[test]
    fn test_render_stats_text() {
        let out = render_stats(&stats(), OutputFormat::Text).unwrap();
        let row = out.lines().nth(2).unwrap();
        assert!(row.starts_with("n1 "));
        assert!(row.ends_with("svc-a, svc-b"));
        assert!(out.contains("Warnings:\n  Node n2 could not be added\n"));
    }

    #[test]
    fn test_render_stats_yaml() {
        let out = render_stats(&stats(), OutputFormat::Yaml).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(parsed["Nodes"]["n1"]["services"]["p1"][1].as_str(), Some("svc-b"));
    }

    #[test]
    fn test_component_health() {
        let component = ComponentStatus {
            metadata: ObjectMeta {
                name: Some("etcd-0".to_string()),
                ..Default::default()
            },
            conditions: Some(vec![ComponentCondition {
                type_: "Healthy".to_string(),
                status: "False".to_string(),
                error: Some("connection refused".to_string()),
                message: None,
            }]),
        };

        let health = ComponentHealth::from_k8s(&component);
        assert_eq!(health.status, "Unhealthy");
        assert_eq!(health.message, "connection refused");

        let unknown = ComponentHealth::from_k8s(&ComponentStatus::default());
        assert_eq!(unknown.status, "Unknown");
    }

    #[test]
    fn test_render_token() {
        let token = TokenView {
            name: "event".to_string(),
            value: "2736".to_string(),
            outdated: true,
        };
        assert_eq!(render_token(&token, OutputFormat::Text).unwrap(), "2736 (outdated)\n");

        let json: serde_json::Value =
            serde_json::from_str(&render_token(&token, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["outdated"], true);
    }
}

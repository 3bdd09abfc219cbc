use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KubemetaError {
    #[error("API server not ready: {0}")]
    NotReady(String),

    #[error("{name}: next connection attempt in {remaining:?}")]
    RetryLater { name: String, remaining: Duration },

    #[error("{name}: giving up after {attempts} attempts, last error: {last_error}")]
    RetriesExhausted {
        name: String,
        attempts: u32,
        last_error: String,
    },

    #[error(transparent)]
    ResourcesAuth(#[from] ResourceAuthErrors),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Token {name} is outdated")]
    TokenOutdated { name: String, value: String },

    #[error("Could not parse the timestamp {value:?} associated with {name}")]
    TimestampFormat { name: String, value: String },

    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error("Could not map the services on node {node:?}: {reason}")]
    Mapping { node: String, reason: String },

    #[error("Not leader")]
    NotLeader,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KubemetaError {
    /// Whether the operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            KubemetaError::NotReady(_)
            | KubemetaError::RetryLater { .. }
            | KubemetaError::KubernetesError(_) => true,
            KubemetaError::ResourcesAuth(errors) => errors.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, KubemetaError>;

/// Resource kinds covered by the authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Event,
    Service,
    Pod,
    Node,
}

impl ResourceKind {
    fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Event => "event collection",
            ResourceKind::Service => "service collection",
            ResourceKind::Pod => "pod collection",
            ResourceKind::Node => "node collection",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Every failed list of one authorization check, in request order
#[derive(Error, Debug, Default)]
pub struct ResourceAuthErrors {
    pub failures: Vec<(ResourceKind, KubemetaError)>,
}

impl ResourceAuthErrors {
    pub fn push(&mut self, kind: ResourceKind, error: KubemetaError) {
        self.failures.push((kind, error));
    }

    /// Only a denied permission makes the check fatal.
    pub fn is_retryable(&self) -> bool {
        !self
            .failures
            .iter()
            .any(|(_, error)| matches!(error, KubemetaError::Forbidden(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.failures.iter().map(|(kind, _)| *kind)
    }
}

impl fmt::Display for ResourceAuthErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("check resources failed: ")?;
        for (i, (kind, error)) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {:?}", kind, error.to_string())?;
        }
        Ok(())
    }
}

pub mod api;
pub mod auth;
pub mod client;
pub mod namespace;
pub mod retry;
pub mod types;

pub use api::{ClusterApi, ClusterApiProvider, KubeClusterApi, KubeClusterApiProvider};
pub use client::{ApiClient, Connector};
pub use namespace::get_resources_namespace;
pub use retry::{Retrier, RetryPolicy, RetryStatus};
pub use types::PodInfo;

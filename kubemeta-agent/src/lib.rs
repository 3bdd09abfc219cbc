//! Node agent for kubemeta (DaemonSet)
//!
//! Responsibilities:
//! - Connect to the API server, retrying while it is not ready
//! - Keep the metadata map of the cluster (or of this node) fresh
//! - Stop cleanly on SIGINT/SIGTERM

pub mod node;
pub mod runner;

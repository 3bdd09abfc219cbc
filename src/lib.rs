pub mod cli;
pub mod config;
pub mod error;
pub mod k8s;
pub mod metadata;
pub mod token;

pub use error::{KubemetaError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

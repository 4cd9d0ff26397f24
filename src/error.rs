//! Error types for homelab

use crate::config::ContainerReference;
use thiserror::Error;

/// Result type for homelab operations
pub type Result<T> = std::result::Result<T, HomelabError>;

/// homelab error types
#[derive(Error, Debug)]
pub enum HomelabError {
    #[error("Config parse error in {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid IPAM configuration: {0}")]
    Ipam(String),

    #[error("Failed to read configs dir {path}: {source}")]
    ConfigsDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    #[error("Failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("{stage} failed for container {container}: {message}")]
    Stage {
        stage: &'static str,
        container: String,
        message: String,
    },

    #[error("{}", format_failures(.failures))]
    Deployment { failures: Vec<ContainerFailure> },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HomelabError {
    /// Errors that must abort a run instead of being collected per container.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HomelabError::Internal(_) | HomelabError::Cancelled(_))
    }
}

/// A single container that failed to reach the running state.
#[derive(Debug)]
pub struct ContainerFailure {
    pub container: ContainerReference,
    pub error: HomelabError,
}

fn format_failures(failures: &[ContainerFailure]) -> String {
    let mut out = format!(
        "Encountered {} error(s) while starting containers:",
        failures.len()
    );
    for (i, failure) in failures.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. {}: {}",
            i + 1,
            failure.container,
            failure.error
        ));
    }
    out
}

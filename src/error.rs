use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while parsing collector configuration text
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration structure at '{path}': {reason}")]
    Structure { path: String, reason: String },
}

/// Errors reported by external collaborators (cluster lookups, config and log sources)
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Failed to spawn subprocess: {0}")]
    SpawnFailed(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when resolving a workload's deployment mode
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No workload or operator resource found for {namespace}/{name}")]
    NotFound { namespace: String, name: String },

    #[error("Deployment mode resolution cancelled")]
    Cancelled,
}

/// Errors that a single rule can surface to the triage engine
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Rule fault: {0}")]
    Fault(String),

    #[error("Rule cancelled")]
    Cancelled,
}

/// Errors that can occur during a feature discovery refresh
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Capability listing failed: {0}")]
    Unavailable(#[from] CollaboratorError),

    #[error("Failed to spawn discovery thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors that can occur during settings loading
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    ReadError(String),

    #[error("Failed to parse settings: {0}")]
    ParseError(String),

    #[error("Invalid settings value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

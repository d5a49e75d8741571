//! Error types for machine-configuration synthesis.

use thiserror::Error;

/// Result type alias for machine-configuration operations.
pub type MachineResult<T> = Result<T, MachineError>;

/// Errors that can occur while synthesizing or rendering machine
/// configuration.
#[derive(Debug, Error)]
pub enum MachineError {
    /// Full machine configuration was requested before the cluster
    /// endpoint (load balancer or anchor node address) was resolved.
    #[error("cluster endpoint is not resolved; a load balancer address or the anchor node address must be known before machine configuration can reference the cluster API")]
    UnresolvedEndpoint,

    #[error("failed to serialize configuration document: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

//! Error types for configuration validation.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while validating a cluster configuration.
///
/// Validation is fail-fast: the first violated invariant aborts and the
/// message names the pool or field responsible.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no control plane pools configured; at least one pool with count >= 1 is required")]
    NoControlPlanePools,

    #[error("control plane pool {pool:?} has count {count}; control plane pools require count >= 1")]
    EmptyControlPlanePool { pool: String, count: u32 },

    #[error("CNI \"custom\" requires at least one manifest URL")]
    CustomCniWithoutUrls,

    #[error("node pool {pool:?}: autoscaler min {min} exceeds max {max}")]
    InvalidAutoscalerBounds { pool: String, min: u32, max: u32 },

    #[error("{role} custom firewall rule {index}: port is required for tcp/udp rules")]
    FirewallPortRequired { role: String, index: usize },

    #[error("{role} custom firewall rule {index}: source_ips is required for direction \"in\"")]
    FirewallSourceIpsRequired { role: String, index: usize },

    #[error(
        "{role} custom firewall rule {index}: destination_ips is required for direction \"out\""
    )]
    FirewallDestinationIpsRequired { role: String, index: usize },
}

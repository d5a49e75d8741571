//! Error types for provisioning.

use thiserror::Error;

/// Result type alias for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that can abort a provisioning run.
///
/// The first error halts forward progress; already-created resources are
/// left in place and a later re-run picks up idempotently.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] basalt_config::ConfigError),

    #[error(transparent)]
    Machine(#[from] basalt_machine::MachineError),

    #[error(transparent)]
    Cloud(#[from] basalt_hcloud::CloudError),

    #[error("node pool {pool:?}: autoscaler node discovery is not supported for control plane pools")]
    AutoscalerDiscoveryOnControlPlane { pool: String },

    #[error("secrets generation failed: {0}")]
    Secrets(#[source] anyhow::Error),

    #[error("machine API call failed for node {node}: {source}")]
    MachineApi {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("upgrade of node {node} failed: {source}")]
    Upgrade {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("deployment of chart {chart} failed: {source}")]
    ChartDeploy {
        chart: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to serialize artifact: {0}")]
    Json(#[from] serde_json::Error),
}

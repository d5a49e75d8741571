//! The OS-configuration API boundary.
//!
//! Talking to a node's machine API (apply configuration, one-time cluster
//! bootstrap, kubeconfig retrieval) is an external collaborator concern;
//! basalt only decides what to send and in which order.

use async_trait::async_trait;

use basalt_hcloud::Node;

/// Machine API operations against a single node.
///
/// Calls are potentially long-latency; the coordinator serializes them
/// only where ordering is semantically required.
#[async_trait]
pub trait MachineApi: Send + Sync {
    /// Apply a complete machine configuration to a running node.
    async fn apply_configuration(&self, node: &Node, user_data: &str) -> anyhow::Result<()>;

    /// Run the one-time cluster bootstrap against the anchor node. Must
    /// be called exactly once per cluster.
    async fn bootstrap(&self, node: &Node) -> anyhow::Result<()>;

    /// Retrieve the admin kubeconfig from the anchor node.
    async fn retrieve_kubeconfig(
        &self,
        node: &Node,
        cert_renewal_duration: &str,
    ) -> anyhow::Result<String>;
}

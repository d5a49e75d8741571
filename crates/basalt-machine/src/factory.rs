//! Full machine-configuration assembly.
//!
//! The synthesizer produces role/phase patches; this factory owns the
//! cluster-wide pieces (name, versions, secrets, endpoint) and renders the
//! complete per-node user-data a server boots with: the base document
//! carrying identity and endpoint, followed by the patch documents.

use std::fmt;

use tracing::debug;

use crate::document::{
    ClusterSection, ControlPlaneEndpointSection, MachineConfigDoc, MachineSection,
};
use crate::error::{MachineError, MachineResult};
use crate::secrets::ClusterSecrets;
use crate::synthesizer::NodeRole;

pub use basalt_config::KUBERNETES_API_PORT;

/// The resolved cluster API endpoint.
///
/// A load balancer address is preferred; when the load balancer is
/// disabled the anchor node's own address stands in (no failover — not for
/// production).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEndpoint {
    LoadBalancer(String),
    AnchorNode(String),
}

impl ClusterEndpoint {
    /// The bare address behind the endpoint.
    pub fn address(&self) -> &str {
        match self {
            ClusterEndpoint::LoadBalancer(addr) | ClusterEndpoint::AnchorNode(addr) => addr,
        }
    }
}

impl fmt::Display for ClusterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "https://{}:{}", self.address(), KUBERNETES_API_PORT)
    }
}

/// Renders complete machine configuration for nodes of a cluster.
///
/// Holds the shared, read-only cluster material: secrets are created once
/// before any synthesis; the endpoint must be resolved before any document
/// referencing the cluster API can be rendered.
#[derive(Debug, Clone)]
pub struct MachineConfigFactory {
    cluster_name: String,
    talos_version: String,
    kubernetes_version: String,
    secrets: ClusterSecrets,
    endpoint: Option<ClusterEndpoint>,
}

impl MachineConfigFactory {
    pub fn new(
        cluster_name: &str,
        talos_version: &str,
        kubernetes_version: &str,
        secrets: ClusterSecrets,
        endpoint: Option<ClusterEndpoint>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            talos_version: talos_version.to_string(),
            kubernetes_version: kubernetes_version.to_string(),
            secrets,
            endpoint,
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn talos_version(&self) -> &str {
        &self.talos_version
    }

    pub fn kubernetes_version(&self) -> &str {
        &self.kubernetes_version
    }

    pub fn secrets(&self) -> &ClusterSecrets {
        &self.secrets
    }

    /// Whether an endpoint has been resolved yet.
    pub fn has_endpoint(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn endpoint(&self) -> Option<&ClusterEndpoint> {
        self.endpoint.as_ref()
    }

    /// Late-bind the anchor node's address as the endpoint. Only valid in
    /// the no-load-balancer setup, after the anchor exists; an existing
    /// load-balancer endpoint is never displaced.
    pub fn set_anchor_endpoint(&mut self, address: &str) {
        if matches!(self.endpoint, Some(ClusterEndpoint::LoadBalancer(_))) {
            return;
        }
        debug!(address, "using anchor node address as cluster endpoint");
        self.endpoint = Some(ClusterEndpoint::AnchorNode(address.to_string()));
    }

    /// Render the complete user-data for a node: the identity document
    /// (secrets, cluster name, endpoint, machine type) followed by the
    /// given patch documents, YAML-stream separated.
    ///
    /// Fails with [`MachineError::UnresolvedEndpoint`] until an endpoint is
    /// known.
    pub fn render_user_data(&self, role: NodeRole, patches: &[String]) -> MachineResult<String> {
        let endpoint = self.endpoint.as_ref().ok_or(MachineError::UnresolvedEndpoint)?;

        let base = MachineConfigDoc {
            debug: false,
            machine: Some(MachineSection {
                machine_type: Some(role.as_str().to_string()),
                token: Some(self.secrets.bootstrap_token.clone()),
                ca: Some(self.secrets.ca_pair()),
                ..Default::default()
            }),
            cluster: Some(ClusterSection {
                id: Some(self.secrets.cluster_id.clone()),
                secret: Some(self.secrets.cluster_secret.clone()),
                cluster_name: Some(self.cluster_name.clone()),
                control_plane: Some(ControlPlaneEndpointSection {
                    endpoint: endpoint.to_string(),
                }),
                token: Some(self.secrets.bootstrap_token.clone()),
                ca: Some(self.secrets.ca_pair()),
                ..Default::default()
            }),
        };

        let mut out = base.to_yaml()?;
        for patch in patches {
            out.push_str("---\n");
            out.push_str(patch);
            if !patch.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out)
    }
}

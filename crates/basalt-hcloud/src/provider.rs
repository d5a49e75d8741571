//! The cloud provider trait and its resource handles.
//!
//! Thin per-resource bindings: every method creates or queries one Hetzner
//! resource and returns an id (plus address fields where the caller needs
//! them). Implementations live outside basalt; tests use an in-memory
//! fake.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use basalt_config::CpuArchitecture;

use crate::error::CloudResult;
use crate::firewall::FirewallRule;

/// A created private network (with its node subnet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub id: String,
    pub subnet_id: String,
}

/// A created firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallHandle {
    pub id: String,
}

/// A created load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerHandle {
    pub id: String,
    pub ipv4: String,
}

/// A created placement group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementGroupHandle {
    pub id: String,
}

/// An uploaded OS image snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHandle {
    pub id: String,
}

/// A cloud server: provider id, assigned address, current image.
///
/// Created with a machine-configuration document as its initial payload;
/// mutated only by config-apply and upgrade operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub ipv4: String,
    /// Image reference the server currently runs.
    pub image: String,
}

/// Arguments for network creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub zone: String,
    pub cidr: String,
    pub subnet: String,
    pub labels: BTreeMap<String, String>,
}

/// Arguments for firewall creation.
#[derive(Debug, Clone, PartialEq)]
pub struct FirewallSpec {
    pub name: String,
    pub rules: Vec<FirewallRule>,
    pub labels: BTreeMap<String, String>,
}

/// Arguments for load balancer creation. The service always forwards the
/// cluster API port; targets are picked by label selector over the private
/// network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub balancer_type: String,
    /// Explicit location, or fall back to the network zone.
    pub location: Option<String>,
    pub network_zone: String,
    pub network_id: String,
    pub listen_port: u16,
    pub destination_port: u16,
    pub target_selector: String,
    pub labels: BTreeMap<String, String>,
}

/// Arguments for placement group creation (spread).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementGroupSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Arguments for an OS image upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub name: String,
    pub arch: CpuArchitecture,
    /// Download URL of the raw image (Talos factory).
    pub url: String,
    /// Server size used to perform the upload; must match the
    /// architecture.
    pub server_size: String,
    pub labels: BTreeMap<String, String>,
}

/// Arguments for server creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub image: String,
    pub server_size: String,
    pub location: String,
    /// Initial OS configuration payload (bootstrap-phase machine config).
    pub user_data: String,
    pub enable_backup: bool,
    pub placement_group: Option<PlacementGroupHandle>,
    pub firewall: FirewallHandle,
    pub labels: BTreeMap<String, String>,
}

/// Thin Hetzner Cloud resource bindings.
///
/// Multiple independent calls may be in flight concurrently; callers
/// serialize only where ordering is semantically required.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create_network(&self, spec: &NetworkSpec) -> CloudResult<NetworkHandle>;

    async fn create_firewall(&self, spec: &FirewallSpec) -> CloudResult<FirewallHandle>;

    async fn create_load_balancer(&self, spec: &LoadBalancerSpec)
    -> CloudResult<LoadBalancerHandle>;

    async fn create_placement_group(
        &self,
        spec: &PlacementGroupSpec,
    ) -> CloudResult<PlacementGroupHandle>;

    async fn upload_image(&self, spec: &ImageSpec) -> CloudResult<ImageHandle>;

    async fn create_server(&self, spec: &ServerSpec) -> CloudResult<Node>;

    /// Attach a server to the private network.
    async fn attach_to_network(&self, server_id: &str, network_id: &str) -> CloudResult<()>;

    /// List servers matching a label selector. Used to discover
    /// autoscaler-created nodes.
    async fn list_servers(&self, selector: &str) -> CloudResult<Vec<Node>>;
}

//! Resource labels and selectors.
//!
//! Every resource basalt creates carries the cluster label plus whatever
//! of role/region/arch/pool applies. The pool label doubles as the
//! selector the autoscaler's node discovery runs on: autoscaler-created
//! servers carry the pool label but not the cluster label, which is how
//! the two populations are told apart.

use std::collections::BTreeMap;

use basalt_config::CpuArchitecture;

/// Label identifying which pool a server belongs to.
pub const NODE_POOL_LABEL: &str = "hcloud/node-group";
/// Label present on every resource basalt itself created.
pub const CLUSTER_LABEL: &str = "cluster";
/// Label carrying the node role ("controlplane" / "worker").
pub const NODE_TYPE_LABEL: &str = "type";

/// Arguments for building a resource label map.
#[derive(Debug, Clone, Default)]
pub struct LabelSpec<'a> {
    pub cluster_name: &'a str,
    pub node_type: Option<&'a str>,
    pub region: Option<&'a str>,
    pub arch: Option<CpuArchitecture>,
    pub pool: Option<&'a str>,
}

/// Build the label map for a Hetzner resource (server, load balancer,
/// firewall, network).
pub fn resource_labels(spec: &LabelSpec<'_>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_LABEL.to_string(), spec.cluster_name.to_string());

    if let Some(node_type) = spec.node_type {
        labels.insert(NODE_TYPE_LABEL.to_string(), node_type.to_string());
    }
    if let Some(pool) = spec.pool {
        labels.insert(NODE_POOL_LABEL.to_string(), pool.to_string());
    }
    if let Some(region) = spec.region {
        labels.insert("region".to_string(), region.to_string());
    }
    if let Some(arch) = spec.arch {
        labels.insert("arch".to_string(), arch.to_string());
    }

    labels
}

/// Selector matching servers the autoscaler created under a pool: they
/// carry the pool label but not the cluster label.
pub fn autoscaler_node_selector(pool: &str) -> String {
    format!("{NODE_POOL_LABEL}={pool},!{CLUSTER_LABEL}")
}

/// Selector the control-plane load balancer targets.
pub fn control_plane_target_selector(cluster_name: &str) -> String {
    format!("{NODE_TYPE_LABEL}=controlplane,{CLUSTER_LABEL}={cluster_name}")
}

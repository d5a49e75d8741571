//! Autoscaler configuration export.
//!
//! The cluster autoscaler runs inside the cluster and creates servers on
//! its own; this module produces the descriptor it needs so those servers
//! boot with the right configuration, labels, and taints. The emitted JSON
//! has fixed field order and lexicographic map keys, so identical input
//! produces byte-identical text — its SHA-256 hash is the cheap change
//! signal consumers watch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use basalt_config::{NodePoolConfig, Taint};
use basalt_hcloud::{FirewallHandle, Images, NetworkHandle};

use crate::error::ProvisionResult;

/// Image id per CPU architecture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesForArch {
    pub arm64: String,
    pub amd64: String,
}

/// Per-pool node template: boot payload plus scheduling metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerNodeConfig {
    /// Complete machine configuration the server boots with.
    pub cloud_init: String,
    /// Pool labels and annotations, merged.
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
}

/// The root descriptor consumed by the autoscaler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerClusterConfig {
    pub images_for_arch: ImagesForArch,
    pub node_configs: BTreeMap<String, AutoscalerNodeConfig>,
}

/// One autoscaling group the autoscaler may scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingGroup {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub instance_type: String,
    pub region: String,
}

/// The full export: descriptor JSON, its hash, the scaling groups, and the
/// companion secret payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalerExport {
    pub cluster_config: AutoscalerClusterConfig,
    /// Canonical JSON rendering of `cluster_config`.
    pub json: String,
    /// SHA-256 over `json`, hex-encoded.
    pub hash: String,
    pub groups: Vec<AutoscalingGroup>,
    /// Data for the companion secret the autoscaler mounts.
    pub secret_data: BTreeMap<String, String>,
}

/// Build the autoscaler export for the given worker pools.
///
/// Every pool appears in `node_configs` — the autoscaler needs a template
/// for any node it discovers under the pool's selector — but only pools
/// with bounds contribute an autoscaling group, unless `force_export` pulls
/// the rest in (for externally managed autoscaler deployments).
///
/// `cloud_init` carries the pool's rendered worker configuration, supplied
/// by the caller per pool name.
pub fn export_autoscaler_config(
    pools: &[NodePoolConfig],
    cloud_init: &BTreeMap<String, String>,
    images: &Images,
    network: &NetworkHandle,
    worker_firewall: &FirewallHandle,
    hcloud_token: &str,
    force_export: bool,
) -> ProvisionResult<AutoscalerExport> {
    let mut node_configs = BTreeMap::new();
    let mut groups = Vec::new();

    for pool in pools {
        let mut labels = pool.labels.clone();
        labels.extend(
            pool.annotations
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        node_configs.insert(
            pool.name.clone(),
            AutoscalerNodeConfig {
                cloud_init: cloud_init.get(&pool.name).cloned().unwrap_or_default(),
                labels,
                taints: pool.taints.clone(),
            },
        );

        match pool.autoscaler {
            Some(bounds) => groups.push(AutoscalingGroup {
                name: pool.name.clone(),
                min_size: bounds.min,
                max_size: bounds.max,
                instance_type: pool.server_size.clone(),
                region: pool.region.clone(),
            }),
            None if force_export => groups.push(AutoscalingGroup {
                name: pool.name.clone(),
                min_size: 0,
                max_size: pool.count,
                instance_type: pool.server_size.clone(),
                region: pool.region.clone(),
            }),
            None => {}
        }
    }

    let cluster_config = AutoscalerClusterConfig {
        images_for_arch: ImagesForArch {
            arm64: images.arm.as_ref().map(|i| i.id.clone()).unwrap_or_default(),
            amd64: images.x86.as_ref().map(|i| i.id.clone()).unwrap_or_default(),
        },
        node_configs,
    };

    let json = serde_json::to_string(&cluster_config)?;
    let hash = hex::encode(Sha256::digest(json.as_bytes()));
    debug!(pools = pools.len(), groups = groups.len(), %hash, "exported autoscaler config");

    let secret_data = BTreeMap::from([
        ("HCLOUD_TOKEN".to_string(), hcloud_token.to_string()),
        ("HCLOUD_NETWORK".to_string(), network.id.clone()),
        ("HCLOUD_FIREWALL".to_string(), worker_firewall.id.clone()),
        ("HCLOUD_CLUSTER_CONFIG".to_string(), json.clone()),
    ]);

    Ok(AutoscalerExport {
        cluster_config,
        json,
        hash,
        groups,
        secret_data,
    })
}

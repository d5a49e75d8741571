//! Add-on chart value computation.
//!
//! basalt computes the value map for every enabled in-cluster add-on; a
//! chart-deployment collaborator applies them to the live cluster. Nothing
//! here may run before the whole fleet has been upgraded — deploying
//! workloads onto stale-OS nodes is how add-ons end up on nodes about to
//! reboot.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Value, json};

use basalt_config::{ClusterConfig, ReclaimPolicy};
use basalt_hcloud::NetworkHandle;

use crate::autoscaler::AutoscalerExport;

/// Name of the secret carrying the Hetzner token for CCM and CSI.
pub const HCLOUD_SECRET_NAME: &str = "hcloud";
/// Name of the companion secret carrying the autoscaler environment and
/// the exported cluster config.
pub const AUTOSCALER_SECRET_NAME: &str = "hcloud-autoscaler";

/// A computed chart deployment: name, source, namespace, and the merged
/// value map.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRelease {
    pub name: String,
    pub chart: String,
    pub repository: String,
    pub namespace: String,
    pub values: Value,
}

/// Applies chart releases and their companion secrets to a live cluster.
/// External collaborator; basalt only computes names and value maps.
#[async_trait]
pub trait ChartDeployer: Send + Sync {
    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> anyhow::Result<()>;

    async fn deploy(&self, release: &ChartRelease) -> anyhow::Result<()>;
}

/// Compute the release list for every enabled add-on, in deploy order.
pub fn compute_addon_releases(
    cfg: &ClusterConfig,
    network: &NetworkHandle,
    autoscaler: Option<&AutoscalerExport>,
) -> Vec<ChartRelease> {
    let mut releases = Vec::new();
    let addons = &cfg.addons;

    if addons.hcloud_ccm.enabled {
        releases.push(ChartRelease {
            name: "hcloud-cloud-controller-manager".to_string(),
            chart: "hcloud-cloud-controller-manager".to_string(),
            repository: "https://charts.hetzner.cloud".to_string(),
            namespace: "kube-system".to_string(),
            values: merge_values(
                addons.hcloud_ccm.values.as_ref(),
                json!({
                    "networking": {
                        "enabled": true,
                        "clusterCIDR": cfg.network.pod_subnets,
                    },
                    "env": {
                        "HCLOUD_NETWORK": { "value": network.id },
                    },
                }),
            ),
        });
    }

    if addons.csi.chart.enabled {
        let reclaim_policy = match addons.csi.reclaim_policy {
            ReclaimPolicy::Delete => "Delete",
            ReclaimPolicy::Retain => "Retain",
        };
        releases.push(ChartRelease {
            name: "hcloud-csi".to_string(),
            chart: "hcloud-csi".to_string(),
            repository: "https://charts.hetzner.cloud".to_string(),
            namespace: "kube-system".to_string(),
            values: merge_values(
                addons.csi.chart.values.as_ref(),
                json!({
                    "storageClasses": [{
                        "name": "hcloud-volumes",
                        "defaultStorageClass": addons.csi.is_default_storage_class,
                        "reclaimPolicy": reclaim_policy,
                    }],
                }),
            ),
        });
    }

    if addons.cluster_autoscaler.enabled
        && let Some(export) = autoscaler
    {
        releases.push(ChartRelease {
            name: "cluster-autoscaler".to_string(),
            chart: "cluster-autoscaler".to_string(),
            repository: "https://kubernetes.github.io/autoscaler".to_string(),
            namespace: "kube-system".to_string(),
            values: merge_values(
                addons.cluster_autoscaler.values.as_ref(),
                json!({
                    "cloudProvider": "hetzner",
                    "envFromSecret": AUTOSCALER_SECRET_NAME,
                    "extraArgs": {
                        "cloud-provider": "hetzner",
                        // Nodes under 50% utilization are candidates for
                        // scale-down.
                        "scale-down-utilization-threshold": "0.5",
                        "scale-down-enabled": true,
                        "skip-nodes-with-local-storage": true,
                    },
                    "autoscalingGroups": export.groups,
                    "autoDiscovery": { "enabled": false },
                    "extraEnv": {
                        "HCLOUD_CLUSTER_CONFIG_FILE":
                            "/etc/kubernetes/hcloud_cluster_config/HCLOUD_CLUSTER_CONFIG",
                        "HCLOUD_CLUSTER_CONFIG_HASH": export.hash,
                    },
                    "extraVolumes": [{
                        "name": "hcloud-config",
                        "secret": { "secretName": AUTOSCALER_SECRET_NAME },
                    }],
                    "extraVolumeMounts": [{
                        "name": "hcloud-config",
                        "mountPath": "/etc/kubernetes/hcloud_cluster_config",
                        "readOnly": true,
                    }],
                }),
            ),
        });
    }

    if addons.longhorn.enabled {
        releases.push(ChartRelease {
            name: "longhorn".to_string(),
            chart: "longhorn".to_string(),
            repository: "https://charts.longhorn.io".to_string(),
            namespace: "longhorn-system".to_string(),
            values: merge_values(
                addons.longhorn.values.as_ref(),
                json!({
                    "csi": { "kubeletRootDir": "/var/lib/kubelet" },
                }),
            ),
        });
    }

    if addons.kubelet_cert_approver.enabled {
        releases.push(ChartRelease {
            name: "kubelet-serving-cert-approver".to_string(),
            chart: "kubelet-serving-cert-approver".to_string(),
            repository: "https://alex1989hu.github.io/kubelet-serving-cert-approver".to_string(),
            namespace: "kubelet-serving-cert-approver".to_string(),
            values: merge_values(addons.kubelet_cert_approver.values.as_ref(), json!({})),
        });
    }

    if addons.metrics_server.enabled {
        releases.push(ChartRelease {
            name: "metrics-server".to_string(),
            chart: "metrics-server".to_string(),
            repository: "https://kubernetes-sigs.github.io/metrics-server".to_string(),
            namespace: "kube-system".to_string(),
            values: merge_values(addons.metrics_server.values.as_ref(), json!({})),
        });
    }

    releases
}

/// The companion secret for CCM/CSI: token plus network id.
pub fn hcloud_secret_data(
    cfg: &ClusterConfig,
    network: &NetworkHandle,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("token".to_string(), cfg.hetzner.token.clone()),
        ("network".to_string(), network.id.clone()),
    ])
}

/// Deep-merge caller value overrides with basalt's required values; on
/// conflict the required value wins.
fn merge_values(user: Option<&Value>, required: Value) -> Value {
    match user {
        None => required,
        Some(user) => {
            let mut merged = user.clone();
            merge_into(&mut merged, required);
            merged
        }
    }
}

fn merge_into(target: &mut Value, overlay: Value) {
    match (target, overlay) {
        (Value::Object(target_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target, overlay) => *target = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use basalt_config::{
        AddOnSettings, ChartSettings, ClusterConfig, ControlPlanePoolConfig,
        ControlPlaneSettings, DiskEncryptionSettings, FirewallSettings, HetznerSettings,
        ImageGeneratorSizes, NetworkSettings, TalosSettings, WorkerPoolSettings,
    };
    use crate::autoscaler::{AutoscalerClusterConfig, AutoscalingGroup};

    fn config_with_addons(addons: AddOnSettings) -> ClusterConfig {
        ClusterConfig {
            cluster_name: "test".to_string(),
            hetzner: HetznerSettings {
                token: "secret-token".to_string(),
            },
            network: NetworkSettings::default(),
            firewall: FirewallSettings::default(),
            talos: TalosSettings {
                image_id_override: None,
                image_version: "v1.9.2".to_string(),
                kubernetes_version: "1.32.0".to_string(),
                cert_renewal_duration: "720h".to_string(),
                generator_sizes: ImageGeneratorSizes::default(),
                enable_longhorn: false,
                enable_local_storage: false,
                local_storage_folders: Vec::new(),
                allow_scheduling_on_control_planes: false,
                secretbox_encryption_secret: None,
                registries: None,
                cert_lifetime: None,
                extra_manifests: Vec::new(),
                extra_manifest_headers: BTreeMap::new(),
                inline_manifests: Vec::new(),
                enable_hcloud_ccm_manifests: false,
                enable_kube_span: false,
                cni: None,
                proxy: None,
                disk_encryption: DiskEncryptionSettings::default(),
            },
            control_plane: ControlPlaneSettings {
                disable_load_balancer: false,
                load_balancer_type: "lb11".to_string(),
                load_balancer_location: None,
                pools: vec![ControlPlanePoolConfig {
                    count: 1,
                    server_size: "cx22".to_string(),
                    arch: None,
                    region: "nbg1".to_string(),
                    enable_backup: false,
                    labels: BTreeMap::new(),
                    annotations: BTreeMap::new(),
                    taints: Vec::new(),
                }],
            },
            worker_pools: WorkerPoolSettings {
                pools: Vec::new(),
                force_export_autoscaler_config: false,
                skip_autoscaler_discovery: false,
            },
            addons,
        }
    }

    fn network() -> NetworkHandle {
        NetworkHandle {
            id: "net-1".to_string(),
            subnet_id: "subnet-1".to_string(),
        }
    }

    fn export() -> AutoscalerExport {
        AutoscalerExport {
            cluster_config: AutoscalerClusterConfig::default(),
            json: "{}".to_string(),
            hash: "deadbeef".to_string(),
            groups: vec![AutoscalingGroup {
                name: "pool-a".to_string(),
                min_size: 1,
                max_size: 5,
                instance_type: "cx22".to_string(),
                region: "nbg1".to_string(),
            }],
            secret_data: BTreeMap::new(),
        }
    }

    #[test]
    fn disabled_addons_produce_no_releases() {
        let cfg = config_with_addons(AddOnSettings::default());
        assert!(compute_addon_releases(&cfg, &network(), None).is_empty());
    }

    #[test]
    fn ccm_values_carry_pod_subnets_and_network() {
        let cfg = config_with_addons(AddOnSettings {
            hcloud_ccm: ChartSettings {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        });
        let releases = compute_addon_releases(&cfg, &network(), None);

        assert_eq!(releases.len(), 1);
        let values = &releases[0].values;
        assert_eq!(values["networking"]["clusterCIDR"], "172.20.0.0/16");
        assert_eq!(values["env"]["HCLOUD_NETWORK"]["value"], "net-1");
    }

    #[test]
    fn autoscaler_values_embed_groups_and_hash() {
        let cfg = config_with_addons(AddOnSettings {
            cluster_autoscaler: ChartSettings {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        });
        let export = export();
        let releases = compute_addon_releases(&cfg, &network(), Some(&export));

        assert_eq!(releases.len(), 1);
        let values = &releases[0].values;
        assert_eq!(values["autoscalingGroups"][0]["name"], "pool-a");
        assert_eq!(values["autoscalingGroups"][0]["minSize"], 1);
        assert_eq!(values["extraEnv"]["HCLOUD_CLUSTER_CONFIG_HASH"], "deadbeef");
    }

    #[test]
    fn user_values_merge_but_never_override_required_ones() {
        let cfg = config_with_addons(AddOnSettings {
            hcloud_ccm: ChartSettings {
                enabled: true,
                values: Some(json!({
                    "networking": { "enabled": false },
                    "replicaCount": 2,
                })),
                ..Default::default()
            },
            ..Default::default()
        });
        let releases = compute_addon_releases(&cfg, &network(), None);

        let values = &releases[0].values;
        // Required value wins on conflict; unrelated user keys survive.
        assert_eq!(values["networking"]["enabled"], true);
        assert_eq!(values["replicaCount"], 2);
    }

    #[test]
    fn hcloud_secret_carries_token_and_network() {
        let cfg = config_with_addons(AddOnSettings::default());
        let data = hcloud_secret_data(&cfg, &network());
        assert_eq!(data["token"], "secret-token");
        assert_eq!(data["network"], "net-1");
    }
}

//! Domain types for the basalt cluster configuration.
//!
//! These types mirror the declarative description a caller provides: node
//! pools, network layout, firewall policy, Talos feature toggles, and
//! add-on selection. All maps are `BTreeMap` so that anything serialized
//! from them is byte-identical across runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::arch::{CpuArchitecture, infer_architecture};
use crate::error::{ConfigError, ConfigResult};

/// Port the Kubernetes API (and its load balancer) listens on.
pub const KUBERNETES_API_PORT: u16 = 6443;

// ── Taints ────────────────────────────────────────────────────────

/// Scheduling effect of a node taint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    NoExecute,
    PreferNoSchedule,
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaintEffect::NoSchedule => write!(f, "NoSchedule"),
            TaintEffect::NoExecute => write!(f, "NoExecute"),
            TaintEffect::PreferNoSchedule => write!(f, "PreferNoSchedule"),
        }
    }
}

/// A Kubernetes node taint.
///
/// Taints are only applied when a node is created; Talos does not support
/// updating them in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

// ── Node pools ────────────────────────────────────────────────────

/// Min/max node count handed to the cluster autoscaler for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalerBounds {
    pub min: u32,
    pub max: u32,
}

/// A named group of homogeneous worker nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePoolConfig {
    pub name: String,
    /// Statically provisioned node count; the autoscaler never removes
    /// these.
    pub count: u32,
    /// Hetzner server type (e.g. "cx22", "cax11").
    pub server_size: String,
    /// Filled from `server_size` during normalization when unset.
    pub arch: Option<CpuArchitecture>,
    /// Hetzner region (e.g. "nbg1", "fsn1").
    pub region: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// When set, the pool participates in autoscaling between these bounds.
    #[serde(default)]
    pub autoscaler: Option<AutoscalerBounds>,
}

/// A group of homogeneous control-plane nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPlanePoolConfig {
    pub count: u32,
    pub server_size: String,
    pub arch: Option<CpuArchitecture>,
    pub region: String,
    /// Daily Hetzner backups, kept seven days.
    #[serde(default)]
    pub enable_backup: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

/// Control-plane wide settings: load balancer and pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPlaneSettings {
    /// Skip the load balancer and use the anchor node's address as the
    /// cluster endpoint. Development/testing only: there is no failover.
    #[serde(default)]
    pub disable_load_balancer: bool,
    /// Hetzner load balancer type (e.g. "lb11").
    pub load_balancer_type: String,
    /// Load balancer location; falls back to the network zone when unset.
    #[serde(default)]
    pub load_balancer_location: Option<String>,
    pub pools: Vec<ControlPlanePoolConfig>,
}

/// Worker pool list plus autoscaler export behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolSettings {
    pub pools: Vec<NodePoolConfig>,
    /// Include every pool in the exported autoscaling-group bounds even
    /// when no pool has bounds set (for externally managed autoscalers).
    #[serde(default)]
    pub force_export_autoscaler_config: bool,
    /// Skip discovery of autoscaler-created nodes. Never enable in
    /// production; discovered nodes would stop receiving config and
    /// upgrades.
    #[serde(default)]
    pub skip_autoscaler_discovery: bool,
}

// ── Network ───────────────────────────────────────────────────────

/// VPC layout and cluster subnets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Hetzner network zone (e.g. "eu-central").
    pub zone: String,
    /// Main network CIDR.
    pub cidr: String,
    /// Node subnet inside the network.
    pub subnet: String,
    /// Pod subnet handed to the CNI.
    pub pod_subnets: String,
    /// Cluster DNS domain; Talos defaults to "cluster.local" when absent.
    #[serde(default)]
    pub dns_domain: Option<String>,
    /// Service subnet; Talos defaults to "10.96.0.0/12" when absent.
    #[serde(default)]
    pub service_subnet: Option<String>,
    /// Custom nameservers for the nodes.
    #[serde(default)]
    pub nameservers: Vec<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            zone: "eu-central".to_string(),
            cidr: "10.128.0.0/9".to_string(),
            subnet: "10.128.1.0/24".to_string(),
            pod_subnets: "172.20.0.0/16".to_string(),
            dns_domain: None,
            service_subnet: None,
            nameservers: Vec::new(),
        }
    }
}

// ── Firewall ──────────────────────────────────────────────────────

/// Traffic direction of a custom firewall rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    In,
    Out,
}

/// Protocol of a custom firewall rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleProtocol {
    Tcp,
    Udp,
    Icmp,
    Gre,
    Esp,
}

impl fmt::Display for RuleProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleProtocol::Tcp => "tcp",
            RuleProtocol::Udp => "udp",
            RuleProtocol::Icmp => "icmp",
            RuleProtocol::Gre => "gre",
            RuleProtocol::Esp => "esp",
        };
        f.write_str(name)
    }
}

/// A caller-supplied firewall rule (e.g. 80/443 for an ingress).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFirewallRule {
    pub direction: RuleDirection,
    pub protocol: RuleProtocol,
    #[serde(default)]
    pub description: Option<String>,
    /// Required for tcp/udp. "any" and ranges like "80-85" are allowed.
    #[serde(default)]
    pub port: Option<String>,
    /// Allowed sources; required when direction is "in".
    #[serde(default)]
    pub source_ips: Vec<String>,
    /// Allowed destinations; required when direction is "out".
    #[serde(default)]
    pub destination_ips: Vec<String>,
}

/// Firewall policy for both node roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirewallSettings {
    /// VPN CIDRs allowed to reach the Talos API; when the load balancer is
    /// disabled these also gate the Kubernetes API port.
    #[serde(default)]
    pub vpn_cidrs: Vec<String>,
    /// Open the Talos API to all IPs (control plane 50000/50001, worker
    /// 50000).
    #[serde(default)]
    pub open_talos_api: bool,
    #[serde(default)]
    pub custom_rules_control_plane: Vec<CustomFirewallRule>,
    #[serde(default)]
    pub custom_rules_worker: Vec<CustomFirewallRule>,
}

// ── Talos features ────────────────────────────────────────────────

/// Server sizes used when uploading the per-architecture OS images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGeneratorSizes {
    pub x86: String,
    pub arm: String,
}

impl Default for ImageGeneratorSizes {
    fn default() -> Self {
        Self {
            x86: "cx22".to_string(),
            arm: "cax11".to_string(),
        }
    }
}

/// Registry mirror endpoints for one upstream registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryMirror {
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub override_path: bool,
    #[serde(default)]
    pub skip_fallback: bool,
}

/// A base64-encoded certificate and key pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificatePair {
    pub crt: String,
    pub key: String,
}

/// TLS settings for one registry host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryTls {
    #[serde(default)]
    pub client_identity: Option<CertificatePair>,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Authentication for one registry host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub identity_token: Option<String>,
}

/// Per-host TLS and auth settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryHost {
    #[serde(default)]
    pub tls: Option<RegistryTls>,
    #[serde(default)]
    pub auth: Option<RegistryAuth>,
}

/// Container registry mirrors and credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistriesSettings {
    #[serde(default)]
    pub mirrors: BTreeMap<String, RegistryMirror>,
    #[serde(default)]
    pub config: BTreeMap<String, RegistryHost>,
}

impl RegistriesSettings {
    /// True when neither mirrors nor per-host config are present.
    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty() && self.config.is_empty()
    }
}

/// CNI selection for the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CniKind {
    Flannel,
    Custom,
    None,
}

impl fmt::Display for CniKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CniKind::Flannel => write!(f, "flannel"),
            CniKind::Custom => write!(f, "custom"),
            CniKind::None => write!(f, "none"),
        }
    }
}

/// CNI configuration; `urls` is required (non-empty) for `Custom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CniSettings {
    pub name: CniKind,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// kube-proxy toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub disabled: bool,
}

/// An inline Kubernetes manifest deployed during bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineManifest {
    pub name: String,
    pub contents: String,
}

/// System disk encryption: which partitions enroll a node-derived LUKS2
/// key at first boot. Enrollment is irreversible and happens only in the
/// bootstrap-phase configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskEncryptionSettings {
    /// Encrypt the STATE partition (on by default).
    pub encrypt_state: bool,
    /// Encrypt the EPHEMERAL partition.
    #[serde(default)]
    pub encrypt_ephemeral: bool,
    /// LUKS2 key slots enrolled with the node-derived key.
    pub key_slots: Vec<u32>,
}

impl Default for DiskEncryptionSettings {
    fn default() -> Self {
        Self {
            encrypt_state: true,
            encrypt_ephemeral: false,
            key_slots: vec![0],
        }
    }
}

/// Talos image, version, and feature toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TalosSettings {
    /// Overrides the Talos image-factory schematic id.
    #[serde(default)]
    pub image_id_override: Option<String>,
    /// Talos release (e.g. "v1.9.2").
    pub image_version: String,
    /// Kubernetes version per the Talos support matrix.
    pub kubernetes_version: String,
    /// Look-ahead window before client certificates are renewed.
    pub cert_renewal_duration: String,
    /// Server sizes used for the per-architecture image uploads.
    #[serde(default)]
    pub generator_sizes: ImageGeneratorSizes,
    /// Longhorn support: extension image, kernel modules, hugepages, and
    /// the kubelet bind mount.
    #[serde(default)]
    pub enable_longhorn: bool,
    #[serde(default)]
    pub enable_local_storage: bool,
    /// Host folders bind-mounted into the kubelet for local storage.
    #[serde(default)]
    pub local_storage_folders: Vec<String>,
    /// Let workloads schedule on control-plane nodes. Testing only.
    #[serde(default)]
    pub allow_scheduling_on_control_planes: bool,
    /// 32-byte key enabling secretbox encryption of Secrets at rest.
    #[serde(default)]
    pub secretbox_encryption_secret: Option<String>,
    #[serde(default)]
    pub registries: Option<RegistriesSettings>,
    /// Admin kubeconfig certificate lifetime (e.g. "8h").
    #[serde(default)]
    pub cert_lifetime: Option<String>,
    /// Manifest URLs deployed during bootstrap.
    #[serde(default)]
    pub extra_manifests: Vec<String>,
    #[serde(default)]
    pub extra_manifest_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub inline_manifests: Vec<InlineManifest>,
    /// Install the Hetzner cloud controller manager via extra manifests.
    #[serde(default)]
    pub enable_hcloud_ccm_manifests: bool,
    /// KubeSpan (WireGuard overlay encryption). Works with flannel;
    /// disable when running a CNI like Cilium.
    #[serde(default)]
    pub enable_kube_span: bool,
    #[serde(default)]
    pub cni: Option<CniSettings>,
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
    #[serde(default)]
    pub disk_encryption: DiskEncryptionSettings,
}

// ── Add-ons ───────────────────────────────────────────────────────

/// A Helm chart toggle with optional version pin and value overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSettings {
    pub enabled: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub values: Option<serde_json::Value>,
}

/// What happens to a volume when its claim is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Retain,
}

/// Hetzner CSI driver settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsiSettings {
    #[serde(flatten)]
    pub chart: ChartSettings,
    #[serde(default)]
    pub is_default_storage_class: bool,
    /// Passphrase for volume encryption; required when the driver is
    /// enabled.
    #[serde(default)]
    pub encryption_passphrase: Option<String>,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

/// In-cluster add-on selection. basalt computes the chart values; a
/// chart-deployment collaborator applies them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddOnSettings {
    #[serde(default)]
    pub hcloud_ccm: ChartSettings,
    #[serde(default)]
    pub csi: CsiSettings,
    #[serde(default)]
    pub cluster_autoscaler: ChartSettings,
    #[serde(default)]
    pub longhorn: ChartSettings,
    #[serde(default)]
    pub kubelet_cert_approver: ChartSettings,
    #[serde(default)]
    pub metrics_server: ChartSettings,
}

// ── Hetzner access ────────────────────────────────────────────────

/// Hetzner Cloud API access handed to in-cluster components. Credential
/// storage is the caller's concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HetznerSettings {
    pub token: String,
}

// ── Root ──────────────────────────────────────────────────────────

/// The root of a cluster deployment description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_name: String,
    #[serde(default)]
    pub hetzner: HetznerSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub firewall: FirewallSettings,
    pub talos: TalosSettings,
    pub control_plane: ControlPlaneSettings,
    pub worker_pools: WorkerPoolSettings,
    #[serde(default)]
    pub addons: AddOnSettings,
}

impl ClusterConfig {
    /// Fill in every derivable field: pool architectures are inferred from
    /// the server size when unset.
    pub fn normalize(&mut self) {
        for pool in &mut self.control_plane.pools {
            if pool.arch.is_none() {
                pool.arch = Some(infer_architecture(&pool.server_size));
            }
        }
        for pool in &mut self.worker_pools.pools {
            if pool.arch.is_none() {
                pool.arch = Some(infer_architecture(&pool.server_size));
            }
        }
    }

    /// Validate cross-field invariants. Must run before any machine
    /// configuration is synthesized; the synthesizer assumes validated
    /// input.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.control_plane.pools.is_empty() {
            return Err(ConfigError::NoControlPlanePools);
        }
        for (i, pool) in self.control_plane.pools.iter().enumerate() {
            if pool.count == 0 {
                return Err(ConfigError::EmptyControlPlanePool {
                    pool: format!("control-plane[{i}]"),
                    count: pool.count,
                });
            }
        }

        if let Some(cni) = &self.talos.cni
            && cni.name == CniKind::Custom
            && cni.urls.is_empty()
        {
            return Err(ConfigError::CustomCniWithoutUrls);
        }

        for pool in &self.worker_pools.pools {
            if let Some(bounds) = &pool.autoscaler
                && bounds.min > bounds.max
            {
                return Err(ConfigError::InvalidAutoscalerBounds {
                    pool: pool.name.clone(),
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }

        validate_custom_rules("control-plane", &self.firewall.custom_rules_control_plane)?;
        validate_custom_rules("worker", &self.firewall.custom_rules_worker)?;

        Ok(())
    }
}

fn validate_custom_rules(role: &str, rules: &[CustomFirewallRule]) -> ConfigResult<()> {
    for (index, rule) in rules.iter().enumerate() {
        let tcp_or_udp = matches!(rule.protocol, RuleProtocol::Tcp | RuleProtocol::Udp);
        if tcp_or_udp && rule.port.is_none() {
            return Err(ConfigError::FirewallPortRequired {
                role: role.to_string(),
                index,
            });
        }
        match rule.direction {
            RuleDirection::In if rule.source_ips.is_empty() => {
                return Err(ConfigError::FirewallSourceIpsRequired {
                    role: role.to_string(),
                    index,
                });
            }
            RuleDirection::Out if rule.destination_ips.is_empty() => {
                return Err(ConfigError::FirewallDestinationIpsRequired {
                    role: role.to_string(),
                    index,
                });
            }
            _ => {}
        }
    }
    Ok(())
}

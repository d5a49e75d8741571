//! Talos machine-configuration document model.
//!
//! A trimmed mirror of the Talos `v1alpha1` config schema covering the
//! sections basalt emits. Serialization follows the upstream "omitempty"
//! behavior: absent optional sections produce no key at all, which Talos
//! treats differently from an empty object (registries in particular).
//!
//! Maps are `BTreeMap` so the emitted YAML is byte-identical for identical
//! input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MachineResult;

fn is_false(v: &bool) -> bool {
    !*v
}

/// Top-level Talos machine configuration: `debug`, `machine`, `cluster`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineConfigDoc {
    #[serde(default, skip_serializing_if = "is_false")]
    pub debug: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterSection>,
}

impl MachineConfigDoc {
    /// Render the document as YAML.
    pub fn to_yaml(&self) -> MachineResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// The `machine:` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSection {
    /// "controlplane" or "worker".
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    /// Bootstrap token (full configuration only, never in patches).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Root CA for the Talos PKI (full configuration only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<CertificatePairSection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletSection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sysctls: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelSection>,
    /// Absent and empty are distinct downstream; only set when the caller
    /// actually configured mirrors or credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registries: Option<RegistriesSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_disk_encryption: Option<SystemDiskEncryptionSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeaturesSection>,
}

/// A base64-encoded certificate + key pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificatePairSection {
    pub crt: String,
    pub key: String,
}

/// `machine.network`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<NetworkDevice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubespan: Option<KubeSpanSection>,
}

/// One network interface entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDevice {
    pub interface: String,
    pub dhcp: bool,
}

/// KubeSpan (WireGuard overlay) toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubeSpanSection {
    pub enabled: bool,
}

/// `machine.kubelet`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletSection {
    #[serde(rename = "nodeIP", skip_serializing_if = "Option::is_none")]
    pub node_ip: Option<KubeletNodeIpSection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_mounts: Vec<ExtraMount>,
}

/// Restricts which addresses the kubelet registers with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeletNodeIpSection {
    pub valid_subnets: Vec<String>,
}

/// An extra bind mount for the kubelet container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraMount {
    pub destination: String,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: String,
    pub options: Vec<String>,
}

impl ExtraMount {
    /// A read-write rshared bind mount of `path` onto itself, the shape
    /// every kubelet host-folder mount takes.
    pub fn bind(path: &str) -> Self {
        Self {
            destination: path.to_string(),
            mount_type: "bind".to_string(),
            source: path.to_string(),
            options: vec![
                "bind".to_string(),
                "rshared".to_string(),
                "rw".to_string(),
            ],
        }
    }
}

/// `machine.kernel`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<KernelModule>,
}

/// A kernel module to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelModule {
    pub name: String,
}

/// `machine.registries`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistriesSection {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mirrors: BTreeMap<String, RegistryMirrorSection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, RegistryHostSection>,
}

/// One registry mirror entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMirrorSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub override_path: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_fallback: bool,
}

/// TLS and auth for one registry host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryHostSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<RegistryTlsSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<RegistryAuthSection>,
}

/// TLS settings for a registry host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryTlsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_identity: Option<CertificatePairSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub insecure_skip_verify: bool,
}

/// Basic or token authentication for a registry host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryAuthSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
}

/// `machine.systemDiskEncryption` — STATE/EPHEMERAL partition encryption.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDiskEncryptionSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<EncryptionSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<EncryptionSection>,
}

/// Partition-level encryption settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionSection {
    pub provider: String,
    pub keys: Vec<EncryptionKeySection>,
}

/// One enrolled encryption key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionKeySection {
    #[serde(rename = "nodeID", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<EncryptionKeyNodeId>,
    pub slot: u32,
}

/// Key derived deterministically from the node UUID and partition label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionKeyNodeId {}

/// `machine.features`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_cache: Option<ImageCacheSection>,
    #[serde(rename = "hostDNS", skip_serializing_if = "Option::is_none")]
    pub host_dns: Option<HostDnsSection>,
}

/// Local container-image cache toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCacheSection {
    pub local_enabled: bool,
}

/// Host DNS caching resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDnsSection {
    #[serde(rename = "forwardKubeDNSToHost")]
    pub forward_kube_dns_to_host: bool,
}

// ── Cluster section ───────────────────────────────────────────────

/// The `cluster:` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlaneEndpointSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<CertificatePairSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<ClusterNetworkSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoverySection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_cloud_provider: Option<ExternalCloudProviderSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secretbox_encryption_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_kubeconfig: Option<AdminKubeconfigSection>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_scheduling_on_control_planes: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_manifests: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_manifest_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_manifests: Vec<InlineManifestSection>,
}

/// Canonical cluster API endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPlaneEndpointSection {
    pub endpoint: String,
}

/// `cluster.network`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cni: Option<CniSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_subnets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_subnets: Vec<String>,
}

/// CNI selection: flannel, custom (with manifest URLs), or none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CniSection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

/// kube-proxy toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySection {
    pub disabled: bool,
}

/// Cluster member discovery; required for KubeSpan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySection {
    pub enabled: bool,
}

/// External cloud provider (CCM) toggle plus its deploy manifests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalCloudProviderSection {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<String>,
}

/// Admin kubeconfig certificate lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminKubeconfigSection {
    pub cert_lifetime: String,
}

/// An inline Kubernetes manifest deployed during bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineManifestSection {
    pub name: String,
    pub contents: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_renders_empty_mapping() {
        let doc = MachineConfigDoc::default();
        assert_eq!(doc.to_yaml().unwrap(), "{}\n");
    }

    #[test]
    fn absent_registries_emit_no_key() {
        let doc = MachineConfigDoc {
            machine: Some(MachineSection {
                machine_type: Some("worker".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let yaml = doc.to_yaml().unwrap();
        assert!(!yaml.contains("registries"));
    }

    #[test]
    fn machine_type_uses_the_type_key() {
        let doc = MachineConfigDoc {
            machine: Some(MachineSection {
                machine_type: Some("controlplane".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("type: controlplane"));
    }

    #[test]
    fn node_id_key_round_trips() {
        let section = SystemDiskEncryptionSection {
            state: Some(EncryptionSection {
                provider: "luks2".to_string(),
                keys: vec![EncryptionKeySection {
                    node_id: Some(EncryptionKeyNodeId {}),
                    slot: 0,
                }],
            }),
            ephemeral: None,
        };
        let yaml = serde_yaml::to_string(&section).unwrap();
        assert!(yaml.contains("nodeID"));
        let parsed: SystemDiskEncryptionSection = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, section);
    }
}

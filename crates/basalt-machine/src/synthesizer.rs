//! Machine-configuration synthesis.
//!
//! `synthesize` turns (role, phase, feature toggles) into the ordered
//! document list `[main, state_volume?, ephemeral_volume?]`. The caller is
//! responsible for validating input first (basalt-config); in particular a
//! custom CNI is assumed to carry manifest URLs by the time it gets here.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use basalt_config::{
    CniSettings, DiskEncryptionSettings, InlineManifest, ProxySettings, RegistriesSettings, Taint,
};

use crate::document::{
    ClusterNetworkSection, ClusterSection, CniSection, DiscoverySection, ExternalCloudProviderSection,
    ExtraMount, FeaturesSection, HostDnsSection, ImageCacheSection, InlineManifestSection,
    KernelModule, KernelSection, KubeSpanSection, KubeletNodeIpSection, KubeletSection,
    MachineConfigDoc, MachineSection, NetworkDevice, NetworkSection, ProxySection,
    RegistriesSection, RegistryAuthSection, RegistryHostSection, RegistryMirrorSection,
    RegistryTlsSection, SystemDiskEncryptionSection, EncryptionKeyNodeId, EncryptionKeySection,
    EncryptionSection, AdminKubeconfigSection, CertificatePairSection,
};
use crate::error::MachineResult;
use crate::volume::VolumeConfigDoc;

/// Manifests installing the Hetzner cloud controller manager during
/// bootstrap.
const HCLOUD_CCM_MANIFESTS: [&str; 2] = [
    "https://raw.githubusercontent.com/hetznercloud/hcloud-cloud-controller-manager/refs/heads/main/deploy/ccm-networks.yaml",
    "https://raw.githubusercontent.com/hetznercloud/hcloud-cloud-controller-manager/refs/heads/main/deploy/ccm.yaml",
];

/// Role of the node a configuration document targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[serde(rename = "controlplane")]
    ControlPlane,
    Worker,
}

impl NodeRole {
    /// The Talos `machine.type` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::ControlPlane => "controlplane",
            NodeRole::Worker => "worker",
        }
    }
}

/// Which lifecycle phase a document belongs to.
///
/// Bootstrap documents are applied once at node creation and carry
/// irreversible settings; ongoing documents supersede them for all later
/// updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigPhase {
    Bootstrap,
    Ongoing,
}

/// Kind of emitted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// The main machine configuration patch.
    Main,
    /// LUKS2 VolumeConfig for the STATE partition.
    StateVolume,
    /// LUKS2 VolumeConfig for the EPHEMERAL partition.
    EphemeralVolume,
}

/// One synthesized OS configuration document, tagged by role and phase.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineConfigDocument {
    pub role: NodeRole,
    pub phase: ConfigPhase,
    pub kind: DocumentKind,
    pub yaml: String,
}

/// Everything the synthesizer needs to know about a node's pool and the
/// cluster-wide feature toggles.
#[derive(Debug, Clone, Default)]
pub struct NodeConfigSpec {
    /// Node subnet; restricts which address the kubelet registers with.
    pub subnet: String,
    pub pod_subnets: String,
    pub dns_domain: Option<String>,
    pub service_subnet: Option<String>,
    pub nameservers: Vec<String>,
    pub node_labels: BTreeMap<String, String>,
    pub node_annotations: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    /// Host folders bind-mounted into the kubelet, in input order.
    pub local_storage_folders: Vec<String>,
    pub enable_longhorn: bool,
    pub secretbox_encryption_secret: Option<String>,
    pub cert_lifetime: Option<String>,
    pub allow_scheduling_on_control_planes: bool,
    pub registries: Option<RegistriesSettings>,
    pub extra_manifests: Vec<String>,
    pub extra_manifest_headers: BTreeMap<String, String>,
    pub inline_manifests: Vec<InlineManifest>,
    pub enable_hcloud_ccm_manifests: bool,
    pub enable_kube_span: bool,
    pub cni: Option<CniSettings>,
    pub proxy: Option<ProxySettings>,
    pub disk_encryption: DiskEncryptionSettings,
}

/// Serialize taints into the kubelet `register-with-taints` form:
/// `key=value:effect`, comma-joined, preserving input order. An empty list
/// yields an empty string.
pub fn serialize_taints(taints: &[Taint]) -> String {
    taints
        .iter()
        .map(|t| format!("{}={}:{}", t.key, t.value, t.effect))
        .collect::<Vec<_>>()
        .join(",")
}

/// Synthesize the ordered configuration documents for one node role and
/// phase: the main config, then STATE/EPHEMERAL volume documents for any
/// partition marked for encryption (bootstrap phase only).
///
/// Deterministic: identical input yields byte-identical output.
pub fn synthesize(
    role: NodeRole,
    phase: ConfigPhase,
    spec: &NodeConfigSpec,
) -> MachineResult<Vec<MachineConfigDocument>> {
    let main = main_document(role, phase, spec)?;

    let mut docs = vec![MachineConfigDocument {
        role,
        phase,
        kind: DocumentKind::Main,
        yaml: main.to_yaml()?,
    }];

    // Key enrollment is irreversible; volume documents never appear in the
    // ongoing phase.
    if phase == ConfigPhase::Bootstrap {
        if spec.disk_encryption.encrypt_state {
            docs.push(MachineConfigDocument {
                role,
                phase,
                kind: DocumentKind::StateVolume,
                yaml: VolumeConfigDoc::encrypted("STATE", &spec.disk_encryption.key_slots)
                    .to_yaml()?,
            });
        }
        if spec.disk_encryption.encrypt_ephemeral {
            docs.push(MachineConfigDocument {
                role,
                phase,
                kind: DocumentKind::EphemeralVolume,
                yaml: VolumeConfigDoc::encrypted("EPHEMERAL", &spec.disk_encryption.key_slots)
                    .to_yaml()?,
            });
        }
    }

    Ok(docs)
}

/// Build the main configuration document (unrendered).
pub(crate) fn main_document(
    role: NodeRole,
    phase: ConfigPhase,
    spec: &NodeConfigSpec,
) -> MachineResult<MachineConfigDoc> {
    let mut extra_args = BTreeMap::new();
    extra_args.insert(
        "register-with-taints".to_string(),
        serialize_taints(&spec.taints),
    );
    // Kubelet certificate rotation is required for the metrics server.
    extra_args.insert(
        "rotate-server-certificates".to_string(),
        "true".to_string(),
    );

    // Local-storage folders first, then the Longhorn mount. The relative
    // order is incidental but must stay deterministic.
    let mut extra_mounts: Vec<ExtraMount> = spec
        .local_storage_folders
        .iter()
        .map(|folder| ExtraMount::bind(folder))
        .collect();
    if spec.enable_longhorn {
        extra_mounts.push(ExtraMount::bind("/var/lib/longhorn"));
    }

    let mut machine = MachineSection {
        machine_type: Some(role.as_str().to_string()),
        node_labels: spec.node_labels.clone(),
        node_annotations: spec.node_annotations.clone(),
        network: Some(NetworkSection {
            interfaces: vec![NetworkDevice {
                interface: "eth1".to_string(),
                dhcp: true,
            }],
            nameservers: spec.nameservers.clone(),
            kubespan: Some(KubeSpanSection {
                enabled: spec.enable_kube_span,
            }),
        }),
        kubelet: Some(KubeletSection {
            node_ip: Some(KubeletNodeIpSection {
                valid_subnets: vec![spec.subnet.clone()],
            }),
            extra_args,
            extra_mounts,
        }),
        features: Some(FeaturesSection {
            image_cache: Some(ImageCacheSection {
                local_enabled: true,
            }),
            host_dns: Some(HostDnsSection {
                forward_kube_dns_to_host: false,
            }),
        }),
        ..Default::default()
    };

    if spec.enable_longhorn {
        machine
            .sysctls
            .insert("vm.nr_hugepages".to_string(), "1024".to_string());
        machine.kernel = Some(KernelSection {
            modules: ["nvme_tcp", "vfio_pci", "uio_pci_generic"]
                .iter()
                .map(|name| KernelModule {
                    name: name.to_string(),
                })
                .collect(),
        });
    }

    // One-time disk-encryption enrollment: bootstrap phase only, and only
    // for partitions explicitly marked.
    if phase == ConfigPhase::Bootstrap {
        let state = spec
            .disk_encryption
            .encrypt_state
            .then(|| encryption_section(&spec.disk_encryption));
        let ephemeral = spec
            .disk_encryption
            .encrypt_ephemeral
            .then(|| encryption_section(&spec.disk_encryption));
        if state.is_some() || ephemeral.is_some() {
            machine.system_disk_encryption =
                Some(SystemDiskEncryptionSection { state, ephemeral });
        }
    }

    machine.registries = registries_section(spec.registries.as_ref());

    let ccm_manifests = if spec.enable_hcloud_ccm_manifests {
        HCLOUD_CCM_MANIFESTS.iter().map(|s| s.to_string()).collect()
    } else {
        Vec::new()
    };

    let cluster = ClusterSection {
        external_cloud_provider: Some(ExternalCloudProviderSection {
            enabled: true,
            manifests: ccm_manifests,
        }),
        network: Some(ClusterNetworkSection {
            cni: spec.cni.as_ref().map(|cni| CniSection {
                name: cni.name.to_string(),
                urls: cni.urls.clone(),
            }),
            dns_domain: spec.dns_domain.clone(),
            pod_subnets: vec![spec.pod_subnets.clone()],
            service_subnets: spec.service_subnet.clone().into_iter().collect(),
        }),
        proxy: spec.proxy.map(|p| ProxySection {
            disabled: p.disabled,
        }),
        // Discovery is required for KubeSpan.
        discovery: Some(DiscoverySection { enabled: true }),
        allow_scheduling_on_control_planes: spec.allow_scheduling_on_control_planes,
        admin_kubeconfig: spec
            .cert_lifetime
            .clone()
            .map(|cert_lifetime| AdminKubeconfigSection { cert_lifetime }),
        secretbox_encryption_secret: spec
            .secretbox_encryption_secret
            .as_ref()
            .map(|secret| BASE64.encode(secret.as_bytes())),
        extra_manifests: spec.extra_manifests.clone(),
        extra_manifest_headers: spec.extra_manifest_headers.clone(),
        inline_manifests: spec
            .inline_manifests
            .iter()
            .map(|m| InlineManifestSection {
                name: m.name.clone(),
                contents: m.contents.clone(),
            })
            .collect(),
        ..Default::default()
    };

    Ok(MachineConfigDoc {
        debug: false,
        machine: Some(machine),
        cluster: Some(cluster),
    })
}

fn encryption_section(settings: &DiskEncryptionSettings) -> EncryptionSection {
    EncryptionSection {
        provider: "luks2".to_string(),
        keys: settings
            .key_slots
            .iter()
            .map(|slot| EncryptionKeySection {
                node_id: Some(EncryptionKeyNodeId {}),
                slot: *slot,
            })
            .collect(),
    }
}

/// Field-by-field translation of the registries settings. Both maps empty
/// (or no settings at all) yields `None`: the absence of the block is part
/// of the observable contract.
fn registries_section(settings: Option<&RegistriesSettings>) -> Option<RegistriesSection> {
    let settings = settings?;
    if settings.is_empty() {
        return None;
    }

    let mirrors = settings
        .mirrors
        .iter()
        .map(|(key, mirror)| {
            (
                key.clone(),
                RegistryMirrorSection {
                    endpoints: mirror.endpoints.clone(),
                    override_path: mirror.override_path,
                    skip_fallback: mirror.skip_fallback,
                },
            )
        })
        .collect();

    let config = settings
        .config
        .iter()
        .map(|(key, host)| {
            (
                key.clone(),
                RegistryHostSection {
                    tls: host.tls.as_ref().map(|tls| RegistryTlsSection {
                        client_identity: tls.client_identity.as_ref().map(|pair| {
                            CertificatePairSection {
                                crt: pair.crt.clone(),
                                key: pair.key.clone(),
                            }
                        }),
                        ca: tls.ca.clone(),
                        insecure_skip_verify: tls.insecure_skip_verify,
                    }),
                    auth: host.auth.as_ref().map(|auth| RegistryAuthSection {
                        username: auth.username.clone(),
                        password: auth.password.clone(),
                        auth: auth.auth.clone(),
                        identity_token: auth.identity_token.clone(),
                    }),
                },
            )
        })
        .collect();

    Some(RegistriesSection { mirrors, config })
}

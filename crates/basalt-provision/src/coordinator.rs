//! The cluster bootstrap coordinator.
//!
//! Drives a validated [`ClusterConfig`] through the provisioning sequence:
//! network → endpoint → secrets → firewalls → control plane → one-time
//! bootstrap → credentials → workers → config application → serialized
//! fleet upgrade → add-ons. Independent cloud calls (the two firewalls,
//! the image uploads) run concurrently; everything with an ordering
//! requirement is sequenced explicitly.
//!
//! The coordinator never rolls back: the first error aborts the run and a
//! later re-run proceeds idempotently, with the one-time steps guarded by
//! the caller-owned [`ProvisionLedger`].

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, warn};

use basalt_config::{ClusterConfig, ControlPlanePoolConfig, NodePoolConfig, Taint};
use basalt_hcloud::{
    CloudProvider, FirewallHandle, FirewallSpec, ImageSpec, Images, LoadBalancerSpec,
    NetworkHandle, NetworkSpec, Node, PlacementGroupSpec, ServerSpec, factory_image_url,
    required_architectures, talos_image_id,
};
use basalt_hcloud::firewall::{control_plane_rules, worker_rules};
use basalt_hcloud::labels::{
    LabelSpec, autoscaler_node_selector, control_plane_target_selector, resource_labels,
};
use basalt_machine::{
    ClusterEndpoint, ConfigPhase, KUBERNETES_API_PORT, MachineConfigFactory, NodeConfigSpec,
    NodeRole, synthesize,
};

use crate::addons::{
    AUTOSCALER_SECRET_NAME, ChartDeployer, ChartRelease, HCLOUD_SECRET_NAME,
    compute_addon_releases, hcloud_secret_data,
};
use crate::api::MachineApi;
use crate::autoscaler::{AutoscalerExport, export_autoscaler_config};
use crate::error::{ProvisionError, ProvisionResult};
use crate::secrets::{SecretsSource, generate_secrets};
use crate::talosconfig::{client_descriptor, talosconfig_path};
use crate::upgrade::{CompletedUpgrades, UpgradeContext, UpgradeQueue, UpgradeRunner};

/// States of a provisioning run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionPhase {
    Init,
    NetworkReady,
    EndpointReady,
    SecretsReady,
    FirewallsReady,
    ControlPlaneProvisioned,
    Bootstrapped,
    EndpointDerived,
    WorkersProvisioned,
    ConfigPatchesApplied,
    FleetUpgraded,
    AddOnsDeployed,
    Done,
}

impl fmt::Display for ProvisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionPhase::Init => "init",
            ProvisionPhase::NetworkReady => "network-ready",
            ProvisionPhase::EndpointReady => "endpoint-ready",
            ProvisionPhase::SecretsReady => "secrets-ready",
            ProvisionPhase::FirewallsReady => "firewalls-ready",
            ProvisionPhase::ControlPlaneProvisioned => "control-plane-provisioned",
            ProvisionPhase::Bootstrapped => "bootstrapped",
            ProvisionPhase::EndpointDerived => "endpoint-derived",
            ProvisionPhase::WorkersProvisioned => "workers-provisioned",
            ProvisionPhase::ConfigPatchesApplied => "config-patches-applied",
            ProvisionPhase::FleetUpgraded => "fleet-upgraded",
            ProvisionPhase::AddOnsDeployed => "add-ons-deployed",
            ProvisionPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Caller-owned memory of one-time work, carried across runs.
///
/// Bootstrap and disk-encryption enrollment happen exactly once per
/// cluster; completed upgrades are keyed so unchanged nodes are no-ops.
#[derive(Debug, Clone, Default)]
pub struct ProvisionLedger {
    pub bootstrap_done: bool,
    pub completed_upgrades: CompletedUpgrades,
}

/// One provisioned pool and everything later steps need from it.
#[derive(Debug, Clone)]
pub struct ProvisionedPool {
    pub name: String,
    pub role: NodeRole,
    /// Statically provisioned nodes, in index order.
    pub nodes: Vec<Node>,
    /// Autoscaler-created nodes discovered under the pool selector.
    pub discovered: Vec<Node>,
    /// Ongoing-phase patch documents, reapplied on every update.
    pub ongoing_patches: Vec<String>,
}

/// The artifacts of a completed run.
#[derive(Debug, Clone)]
pub struct ProvisionedCluster {
    pub endpoint: ClusterEndpoint,
    /// Cluster client descriptor (talosconfig JSON).
    pub talosconfig: String,
    /// Admin kubeconfig retrieved from the anchor.
    pub kubeconfig: String,
    pub control_plane_pools: Vec<ProvisionedPool>,
    pub worker_pools: Vec<ProvisionedPool>,
    pub autoscaler_export: Option<AutoscalerExport>,
    /// Add-on releases handed to the chart collaborator, in deploy order.
    pub releases: Vec<ChartRelease>,
}

/// Sequences resource creation, bootstrap, configuration, upgrade, and
/// add-on deployment for one cluster.
pub struct ClusterProvisioner<'a> {
    cfg: ClusterConfig,
    cloud: &'a dyn CloudProvider,
    machine_api: &'a dyn MachineApi,
    secrets_source: &'a dyn SecretsSource,
    upgrade_runner: &'a dyn UpgradeRunner,
    chart_deployer: &'a dyn ChartDeployer,
    phase: ProvisionPhase,
}

impl<'a> ClusterProvisioner<'a> {
    /// Normalize and validate the configuration up front; everything after
    /// this assumes validated input.
    pub fn new(
        mut cfg: ClusterConfig,
        cloud: &'a dyn CloudProvider,
        machine_api: &'a dyn MachineApi,
        secrets_source: &'a dyn SecretsSource,
        upgrade_runner: &'a dyn UpgradeRunner,
        chart_deployer: &'a dyn ChartDeployer,
    ) -> ProvisionResult<Self> {
        cfg.normalize();
        cfg.validate()?;
        Ok(Self {
            cfg,
            cloud,
            machine_api,
            secrets_source,
            upgrade_runner,
            chart_deployer,
            phase: ProvisionPhase::Init,
        })
    }

    pub fn phase(&self) -> ProvisionPhase {
        self.phase
    }

    fn advance(&mut self, phase: ProvisionPhase) {
        self.phase = phase;
        info!(phase = %phase, "provisioning phase reached");
    }

    /// Run the full pipeline. The first error halts the run; the ledger
    /// keeps one-time work from re-executing on the next attempt.
    pub async fn run(
        &mut self,
        ledger: &mut ProvisionLedger,
    ) -> ProvisionResult<ProvisionedCluster> {
        let cluster = self.cfg.cluster_name.clone();
        info!(cluster = %cluster, "provisioning cluster");

        let network = self.create_network().await?;
        self.advance(ProvisionPhase::NetworkReady);

        // A load balancer address is the preferred endpoint. Without one,
        // the endpoint stays unresolved until the anchor node exists.
        let lb_endpoint = if self.cfg.control_plane.disable_load_balancer {
            warn!("load balancer disabled; the anchor node address becomes the cluster endpoint (no failover, not for production)");
            None
        } else {
            let lb = self.create_load_balancer(&network).await?;
            Some(ClusterEndpoint::LoadBalancer(lb.ipv4))
        };
        if lb_endpoint.is_some() {
            self.advance(ProvisionPhase::EndpointReady);
        }

        // Secrets precede all configuration synthesis.
        let secrets = generate_secrets(self.secrets_source, &cluster)?;
        let mut factory = MachineConfigFactory::new(
            &cluster,
            &self.cfg.talos.image_version,
            &self.cfg.talos.kubernetes_version,
            secrets.clone(),
            lb_endpoint,
        );
        self.advance(ProvisionPhase::SecretsReady);

        // The two firewalls are independent of each other.
        let expose_api = self.cfg.control_plane.disable_load_balancer;
        let cp_fw_spec = FirewallSpec {
            name: format!("{cluster}-fw-controlplane"),
            rules: control_plane_rules(&self.cfg.firewall, expose_api),
            labels: resource_labels(&LabelSpec {
                cluster_name: &cluster,
                node_type: Some(NodeRole::ControlPlane.as_str()),
                ..Default::default()
            }),
        };
        let worker_fw_spec = FirewallSpec {
            name: format!("{cluster}-fw-worker"),
            rules: worker_rules(&self.cfg.firewall),
            labels: resource_labels(&LabelSpec {
                cluster_name: &cluster,
                node_type: Some(NodeRole::Worker.as_str()),
                ..Default::default()
            }),
        };
        let (cp_firewall, worker_firewall) = tokio::join!(
            self.cloud.create_firewall(&cp_fw_spec),
            self.cloud.create_firewall(&worker_fw_spec),
        );
        let (cp_firewall, worker_firewall) = (cp_firewall?, worker_firewall?);
        self.advance(ProvisionPhase::FirewallsReady);

        let images = self.upload_images(&cluster).await?;

        let placement_group = self
            .cloud
            .create_placement_group(&PlacementGroupSpec {
                name: format!("{cluster}-controlplane-placement"),
                labels: resource_labels(&LabelSpec {
                    cluster_name: &cluster,
                    node_type: Some(NodeRole::ControlPlane.as_str()),
                    ..Default::default()
                }),
            })
            .await?;

        let mut cp_pools = Vec::new();
        for (pool_index, pool) in self.cfg.control_plane.pools.clone().iter().enumerate() {
            let provisioned = self
                .provision_control_plane_pool(
                    pool_index,
                    pool,
                    &mut factory,
                    &network,
                    &images,
                    &cp_firewall,
                    &placement_group,
                )
                .await?;
            cp_pools.push(provisioned);
        }
        self.advance(ProvisionPhase::ControlPlaneProvisioned);

        // The anchor is the unique bootstrap target: first pool, first
        // node.
        let anchor = cp_pools[0].nodes[0].clone();
        if ledger.bootstrap_done {
            info!(node = %anchor.name, "cluster already bootstrapped, skipping");
        } else {
            self.machine_api
                .bootstrap(&anchor)
                .await
                .map_err(|source| ProvisionError::MachineApi {
                    node: anchor.name.clone(),
                    source,
                })?;
            ledger.bootstrap_done = true;
        }
        self.advance(ProvisionPhase::Bootstrapped);

        // Credential derivation reads the anchor; nothing else may be
        // mid-configuration on it at this point in the sequence.
        let kubeconfig = self
            .machine_api
            .retrieve_kubeconfig(&anchor, &self.cfg.talos.cert_renewal_duration)
            .await
            .map_err(|source| ProvisionError::MachineApi {
                node: anchor.name.clone(),
                source,
            })?;
        self.advance(ProvisionPhase::EndpointDerived);

        let mut worker_pools = Vec::new();
        for pool in self.cfg.worker_pools.pools.clone() {
            let provisioned = self
                .provision_worker_pool(&pool, &factory, &network, &images, &worker_firewall)
                .await?;
            worker_pools.push(provisioned);
        }
        self.advance(ProvisionPhase::WorkersProvisioned);

        // Fleet addresses are accumulated append-only per pool; only now
        // that every pool has finished may they feed a final artifact.
        let endpoints: Vec<String> = cp_pools
            .iter()
            .flat_map(|p| p.nodes.iter().map(|n| n.ipv4.clone()))
            .collect();
        let mut fleet = endpoints.clone();
        fleet.extend(
            worker_pools
                .iter()
                .flat_map(|p| p.nodes.iter().map(|n| n.ipv4.clone())),
        );
        let talosconfig = client_descriptor(&cluster, &endpoints, &fleet, &secrets)?;

        // Ongoing-phase configuration goes to every node, discovered ones
        // included.
        for pool in cp_pools.iter().chain(worker_pools.iter()) {
            let user_data = factory.render_user_data(pool.role, &pool.ongoing_patches)?;
            for node in pool.nodes.iter().chain(pool.discovered.iter()) {
                self.machine_api
                    .apply_configuration(node, &user_data)
                    .await
                    .map_err(|source| ProvisionError::MachineApi {
                        node: node.name.clone(),
                        source,
                    })?;
            }
        }
        self.advance(ProvisionPhase::ConfigPatchesApplied);

        // One strict global chain: control-plane pools first, then worker
        // pools, static nodes before discovered ones within a pool.
        let mut queue = UpgradeQueue::new(UpgradeContext {
            talosconfig_path: talosconfig_path(&cluster),
            talosconfig_value: talosconfig.clone(),
            talos_version: self.cfg.talos.image_version.clone(),
            talos_image: images.talos_image_id.clone(),
            arm_image: images.arm.as_ref().map(|i| i.id.clone()).unwrap_or_default(),
            x86_image: images.x86.as_ref().map(|i| i.id.clone()).unwrap_or_default(),
        });
        for pool in cp_pools.iter().chain(worker_pools.iter()) {
            for node in pool.nodes.iter().chain(pool.discovered.iter()) {
                queue.enqueue(node);
            }
        }
        queue.run(self.upgrade_runner, &mut ledger.completed_upgrades).await?;
        self.advance(ProvisionPhase::FleetUpgraded);

        // Add-ons only reach nodes that already run the target OS.
        let autoscaler_export = self
            .export_autoscaler(&factory, &images, &network, &worker_firewall)
            .await?;
        if let Some(export) = &autoscaler_export {
            self.chart_deployer
                .apply_secret("kube-system", AUTOSCALER_SECRET_NAME, &export.secret_data)
                .await
                .map_err(|source| ProvisionError::ChartDeploy {
                    chart: AUTOSCALER_SECRET_NAME.to_string(),
                    source,
                })?;
        }
        let needs_hcloud_secret = !self.cfg.hetzner.token.is_empty()
            && (self.cfg.addons.hcloud_ccm.enabled || self.cfg.addons.csi.chart.enabled);
        if needs_hcloud_secret {
            let data = hcloud_secret_data(&self.cfg, &network);
            self.chart_deployer
                .apply_secret("kube-system", HCLOUD_SECRET_NAME, &data)
                .await
                .map_err(|source| ProvisionError::ChartDeploy {
                    chart: HCLOUD_SECRET_NAME.to_string(),
                    source,
                })?;
        }
        let releases =
            compute_addon_releases(&self.cfg, &network, autoscaler_export.as_ref());
        for release in &releases {
            self.chart_deployer
                .deploy(release)
                .await
                .map_err(|source| ProvisionError::ChartDeploy {
                    chart: release.name.clone(),
                    source,
                })?;
        }
        self.advance(ProvisionPhase::AddOnsDeployed);

        self.advance(ProvisionPhase::Done);
        let endpoint = factory
            .endpoint()
            .cloned()
            .ok_or(basalt_machine::MachineError::UnresolvedEndpoint)?;
        Ok(ProvisionedCluster {
            endpoint,
            talosconfig,
            kubeconfig,
            control_plane_pools: cp_pools,
            worker_pools,
            autoscaler_export,
            releases,
        })
    }

    async fn create_network(&self) -> ProvisionResult<NetworkHandle> {
        Ok(self
            .cloud
            .create_network(&NetworkSpec {
                name: format!("{}-network", self.cfg.cluster_name),
                zone: self.cfg.network.zone.clone(),
                cidr: self.cfg.network.cidr.clone(),
                subnet: self.cfg.network.subnet.clone(),
                labels: resource_labels(&LabelSpec {
                    cluster_name: &self.cfg.cluster_name,
                    ..Default::default()
                }),
            })
            .await?)
    }

    async fn create_load_balancer(
        &self,
        network: &NetworkHandle,
    ) -> ProvisionResult<basalt_hcloud::LoadBalancerHandle> {
        let cp = &self.cfg.control_plane;
        Ok(self
            .cloud
            .create_load_balancer(&LoadBalancerSpec {
                name: format!("{}-controlplane", self.cfg.cluster_name),
                balancer_type: cp.load_balancer_type.clone(),
                location: cp.load_balancer_location.clone(),
                network_zone: self.cfg.network.zone.clone(),
                network_id: network.id.clone(),
                listen_port: KUBERNETES_API_PORT,
                destination_port: KUBERNETES_API_PORT,
                target_selector: control_plane_target_selector(&self.cfg.cluster_name),
                labels: resource_labels(&LabelSpec {
                    cluster_name: &self.cfg.cluster_name,
                    node_type: Some(NodeRole::ControlPlane.as_str()),
                    ..Default::default()
                }),
            })
            .await?)
    }

    /// Upload the OS image for every architecture the pools actually use;
    /// the uploads are independent and run concurrently.
    async fn upload_images(&self, cluster: &str) -> ProvisionResult<Images> {
        let talos = &self.cfg.talos;
        let image_id = talos_image_id(talos.image_id_override.as_deref(), talos.enable_longhorn);

        let architectures = self
            .cfg
            .control_plane
            .pools
            .iter()
            .filter_map(|p| p.arch)
            .chain(self.cfg.worker_pools.pools.iter().filter_map(|p| p.arch));
        let (need_arm, need_x86) = required_architectures(architectures);

        let upload = |arch, server_size: String| {
            let image_id = image_id.clone();
            let version = talos.image_version.clone();
            let cluster = cluster.to_string();
            async move {
                let spec = ImageSpec {
                    name: format!("talos-{arch}-{version}"),
                    arch,
                    url: factory_image_url(&image_id, &version, arch),
                    server_size,
                    labels: resource_labels(&LabelSpec {
                        cluster_name: &cluster,
                        arch: Some(arch),
                        ..Default::default()
                    }),
                };
                self.cloud.upload_image(&spec).await
            }
        };

        let (arm, x86) = tokio::join!(
            async {
                if need_arm {
                    upload(
                        basalt_config::CpuArchitecture::Arm64,
                        talos.generator_sizes.arm.clone(),
                    )
                    .await
                    .map(Some)
                } else {
                    Ok(None)
                }
            },
            async {
                if need_x86 {
                    upload(
                        basalt_config::CpuArchitecture::Amd64,
                        talos.generator_sizes.x86.clone(),
                    )
                    .await
                    .map(Some)
                } else {
                    Ok(None)
                }
            },
        );

        Ok(Images {
            arm: arm?,
            x86: x86?,
            talos_image_id: image_id,
        })
    }

    /// The synthesizer input for one pool, from the cluster-wide toggles
    /// plus the pool's scheduling metadata.
    fn node_spec(
        &self,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
        taints: &[Taint],
    ) -> NodeConfigSpec {
        let talos = &self.cfg.talos;
        let network = &self.cfg.network;

        let local_storage_folders = if talos.enable_local_storage {
            if talos.local_storage_folders.is_empty() {
                vec!["/var/mnt".to_string()]
            } else {
                talos.local_storage_folders.clone()
            }
        } else {
            Vec::new()
        };

        NodeConfigSpec {
            subnet: network.subnet.clone(),
            pod_subnets: network.pod_subnets.clone(),
            dns_domain: network.dns_domain.clone(),
            service_subnet: network.service_subnet.clone(),
            nameservers: network.nameservers.clone(),
            node_labels: labels.clone(),
            node_annotations: annotations.clone(),
            taints: taints.to_vec(),
            local_storage_folders,
            enable_longhorn: talos.enable_longhorn,
            secretbox_encryption_secret: talos.secretbox_encryption_secret.clone(),
            cert_lifetime: talos.cert_lifetime.clone(),
            allow_scheduling_on_control_planes: talos.allow_scheduling_on_control_planes,
            registries: talos.registries.clone(),
            extra_manifests: talos.extra_manifests.clone(),
            extra_manifest_headers: talos.extra_manifest_headers.clone(),
            inline_manifests: talos.inline_manifests.clone(),
            enable_hcloud_ccm_manifests: talos.enable_hcloud_ccm_manifests,
            enable_kube_span: talos.enable_kube_span,
            cni: talos.cni.clone(),
            proxy: talos.proxy,
            disk_encryption: talos.disk_encryption.clone(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn provision_control_plane_pool(
        &mut self,
        pool_index: usize,
        pool: &ControlPlanePoolConfig,
        factory: &mut MachineConfigFactory,
        network: &NetworkHandle,
        images: &Images,
        firewall: &FirewallHandle,
        placement_group: &basalt_hcloud::PlacementGroupHandle,
    ) -> ProvisionResult<ProvisionedPool> {
        let pool_name = format!("controlplane-{}-{}", pool.region, pool.server_size).to_lowercase();
        let spec = self.node_spec(&pool.labels, &pool.annotations, &pool.taints);
        let bootstrap_patches = patch_yaml(synthesize(
            NodeRole::ControlPlane,
            ConfigPhase::Bootstrap,
            &spec,
        )?);
        let ongoing_patches = patch_yaml(synthesize(
            NodeRole::ControlPlane,
            ConfigPhase::Ongoing,
            &spec,
        )?);

        let arch = pool
            .arch
            .unwrap_or_else(|| basalt_config::infer_architecture(&pool.server_size));
        let image = images.for_arch(arch)?;
        let labels = resource_labels(&LabelSpec {
            cluster_name: &self.cfg.cluster_name,
            node_type: Some(NodeRole::ControlPlane.as_str()),
            region: Some(&pool.region),
            arch: Some(arch),
            ..Default::default()
        });

        let mut nodes = Vec::with_capacity(pool.count as usize);
        for node_index in 0..pool.count {
            let node_name = format!("{pool_name}-{node_index}");
            let is_anchor = pool_index == 0 && node_index == 0;

            let node = if is_anchor && !factory.has_endpoint() {
                // No load balancer: the anchor boots unconfigured into
                // maintenance mode, its address becomes the endpoint, and
                // only then can its (and everyone else's) configuration be
                // rendered.
                let node = self
                    .cloud
                    .create_server(&ServerSpec {
                        name: node_name.clone(),
                        image: image.id.clone(),
                        server_size: pool.server_size.clone(),
                        location: pool.region.clone(),
                        user_data: String::new(),
                        enable_backup: pool.enable_backup,
                        placement_group: Some(placement_group.clone()),
                        firewall: firewall.clone(),
                        labels: labels.clone(),
                    })
                    .await?;
                factory.set_anchor_endpoint(&node.ipv4);
                self.advance(ProvisionPhase::EndpointReady);

                let user_data =
                    factory.render_user_data(NodeRole::ControlPlane, &bootstrap_patches)?;
                self.machine_api
                    .apply_configuration(&node, &user_data)
                    .await
                    .map_err(|source| ProvisionError::MachineApi {
                        node: node.name.clone(),
                        source,
                    })?;
                node
            } else {
                let user_data =
                    factory.render_user_data(NodeRole::ControlPlane, &bootstrap_patches)?;
                self.cloud
                    .create_server(&ServerSpec {
                        name: node_name.clone(),
                        image: image.id.clone(),
                        server_size: pool.server_size.clone(),
                        location: pool.region.clone(),
                        user_data,
                        enable_backup: pool.enable_backup,
                        placement_group: Some(placement_group.clone()),
                        firewall: firewall.clone(),
                        labels: labels.clone(),
                    })
                    .await?
            };

            self.cloud.attach_to_network(&node.id, &network.id).await?;
            nodes.push(node);
        }

        info!(pool = %pool_name, nodes = nodes.len(), "control plane pool provisioned");
        Ok(ProvisionedPool {
            name: pool_name,
            role: NodeRole::ControlPlane,
            nodes,
            discovered: Vec::new(),
            ongoing_patches,
        })
    }

    async fn provision_worker_pool(
        &self,
        pool: &NodePoolConfig,
        factory: &MachineConfigFactory,
        network: &NetworkHandle,
        images: &Images,
        firewall: &FirewallHandle,
    ) -> ProvisionResult<ProvisionedPool> {
        let spec = self.node_spec(&pool.labels, &pool.annotations, &pool.taints);
        let bootstrap_patches =
            patch_yaml(synthesize(NodeRole::Worker, ConfigPhase::Bootstrap, &spec)?);
        let ongoing_patches =
            patch_yaml(synthesize(NodeRole::Worker, ConfigPhase::Ongoing, &spec)?);

        let arch = pool
            .arch
            .unwrap_or_else(|| basalt_config::infer_architecture(&pool.server_size));
        let image = images.for_arch(arch)?;
        let labels = resource_labels(&LabelSpec {
            cluster_name: &self.cfg.cluster_name,
            node_type: Some(NodeRole::Worker.as_str()),
            region: Some(&pool.region),
            arch: Some(arch),
            pool: Some(&pool.name),
        });
        let user_data = factory.render_user_data(NodeRole::Worker, &bootstrap_patches)?;

        let mut nodes = Vec::with_capacity(pool.count as usize);
        for node_index in 0..pool.count {
            let node = self
                .cloud
                .create_server(&ServerSpec {
                    name: format!("{}-{node_index}", pool.name).to_lowercase(),
                    image: image.id.clone(),
                    server_size: pool.server_size.clone(),
                    location: pool.region.clone(),
                    user_data: user_data.clone(),
                    enable_backup: false,
                    placement_group: None,
                    firewall: firewall.clone(),
                    labels: labels.clone(),
                })
                .await?;
            self.cloud.attach_to_network(&node.id, &network.id).await?;
            nodes.push(node);
        }

        let mut provisioned = ProvisionedPool {
            name: pool.name.clone(),
            role: NodeRole::Worker,
            nodes,
            discovered: Vec::new(),
            ongoing_patches,
        };

        if self.cfg.worker_pools.skip_autoscaler_discovery {
            warn!(pool = %pool.name, "autoscaler node discovery skipped by configuration");
        } else {
            provisioned.discovered = self.discover_autoscaler_nodes(&provisioned).await?;
        }

        info!(
            pool = %pool.name,
            nodes = provisioned.nodes.len(),
            discovered = provisioned.discovered.len(),
            "worker pool provisioned"
        );
        Ok(provisioned)
    }

    /// Find nodes the autoscaler created under a pool's selector.
    ///
    /// Control-plane pools never scale automatically; asking is a
    /// configuration error and fails fast, naming the pool.
    pub async fn discover_autoscaler_nodes(
        &self,
        pool: &ProvisionedPool,
    ) -> ProvisionResult<Vec<Node>> {
        if pool.role == NodeRole::ControlPlane {
            return Err(ProvisionError::AutoscalerDiscoveryOnControlPlane {
                pool: pool.name.clone(),
            });
        }
        Ok(self
            .cloud
            .list_servers(&autoscaler_node_selector(&pool.name))
            .await?)
    }

    /// Build the autoscaler export when any pool opts in (bounds set) or
    /// the force flag pulls everything in.
    async fn export_autoscaler(
        &self,
        factory: &MachineConfigFactory,
        images: &Images,
        network: &NetworkHandle,
        worker_firewall: &FirewallHandle,
    ) -> ProvisionResult<Option<AutoscalerExport>> {
        let pools = &self.cfg.worker_pools.pools;
        let force = self.cfg.worker_pools.force_export_autoscaler_config;
        let has_bounds = pools.iter().any(|p| p.autoscaler.is_some());
        if !has_bounds && !force {
            return Ok(None);
        }

        // The template a scaled-up node boots with is the pool's ongoing
        // worker configuration.
        let mut cloud_init = BTreeMap::new();
        for pool in pools {
            let spec = self.node_spec(&pool.labels, &pool.annotations, &pool.taints);
            let patches = patch_yaml(synthesize(NodeRole::Worker, ConfigPhase::Ongoing, &spec)?);
            cloud_init.insert(
                pool.name.clone(),
                factory.render_user_data(NodeRole::Worker, &patches)?,
            );
        }

        Ok(Some(export_autoscaler_config(
            pools,
            &cloud_init,
            images,
            network,
            worker_firewall,
            &self.cfg.hetzner.token,
            force,
        )?))
    }
}

fn patch_yaml(docs: Vec<basalt_machine::MachineConfigDocument>) -> Vec<String> {
    docs.into_iter().map(|d| d.yaml).collect()
}

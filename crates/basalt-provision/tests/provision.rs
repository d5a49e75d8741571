//! End-to-end coordinator tests against in-memory collaborators.
//!
//! The fake cloud assigns deterministic ids/addresses and records every
//! call; the fake machine API and upgrade runner feed a shared event log
//! so cross-step ordering (bootstrap-once, upgrades-before-add-ons) can be
//! asserted.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use basalt_config::{
    AddOnSettings, AutoscalerBounds, ChartSettings, ClusterConfig, ControlPlanePoolConfig,
    ControlPlaneSettings, DiskEncryptionSettings, FirewallSettings, HetznerSettings,
    ImageGeneratorSizes, NetworkSettings, NodePoolConfig, TalosSettings, WorkerPoolSettings,
};
use basalt_hcloud::{
    CloudProvider, CloudResult, FirewallHandle, FirewallSpec, ImageHandle, ImageSpec,
    LoadBalancerHandle, LoadBalancerSpec, NetworkHandle, NetworkSpec, Node, PlacementGroupHandle,
    PlacementGroupSpec, ServerSpec,
};
use basalt_machine::{ClusterEndpoint, NodeRole};
use basalt_provision::{
    ChartDeployer, ChartRelease, ClusterProvisioner, MachineApi, ProvisionError, ProvisionLedger,
    ProvisionedPool, RcgenSecretsSource, UpgradeRunner, UpgradeTask,
};

// ── Fakes ─────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeCloudState {
    server_count: u32,
    servers: Vec<ServerSpec>,
    firewalls: Vec<FirewallSpec>,
    load_balancers: Vec<LoadBalancerSpec>,
    attachments: Vec<(String, String)>,
    selectors: Vec<String>,
    images: Vec<ImageSpec>,
}

#[derive(Default)]
struct FakeCloud {
    state: Mutex<FakeCloudState>,
    /// Pool name → nodes "the autoscaler created".
    discovered: BTreeMap<String, Vec<Node>>,
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn create_network(&self, _spec: &NetworkSpec) -> CloudResult<NetworkHandle> {
        Ok(NetworkHandle {
            id: "net-1".to_string(),
            subnet_id: "subnet-1".to_string(),
        })
    }

    async fn create_firewall(&self, spec: &FirewallSpec) -> CloudResult<FirewallHandle> {
        let mut state = self.state.lock().unwrap();
        state.firewalls.push(spec.clone());
        Ok(FirewallHandle {
            id: format!("fw-{}", state.firewalls.len()),
        })
    }

    async fn create_load_balancer(
        &self,
        spec: &LoadBalancerSpec,
    ) -> CloudResult<LoadBalancerHandle> {
        let mut state = self.state.lock().unwrap();
        state.load_balancers.push(spec.clone());
        Ok(LoadBalancerHandle {
            id: "lb-1".to_string(),
            ipv4: "203.0.113.1".to_string(),
        })
    }

    async fn create_placement_group(
        &self,
        _spec: &PlacementGroupSpec,
    ) -> CloudResult<PlacementGroupHandle> {
        Ok(PlacementGroupHandle {
            id: "pg-1".to_string(),
        })
    }

    async fn upload_image(&self, spec: &ImageSpec) -> CloudResult<ImageHandle> {
        let mut state = self.state.lock().unwrap();
        state.images.push(spec.clone());
        Ok(ImageHandle {
            id: format!("img-{}", state.images.len()),
        })
    }

    async fn create_server(&self, spec: &ServerSpec) -> CloudResult<Node> {
        let mut state = self.state.lock().unwrap();
        state.server_count += 1;
        let n = state.server_count;
        state.servers.push(spec.clone());
        Ok(Node {
            id: format!("srv-{n}"),
            name: spec.name.clone(),
            ipv4: format!("10.0.0.{n}"),
            image: spec.image.clone(),
        })
    }

    async fn attach_to_network(&self, server_id: &str, network_id: &str) -> CloudResult<()> {
        self.state
            .lock()
            .unwrap()
            .attachments
            .push((server_id.to_string(), network_id.to_string()));
        Ok(())
    }

    async fn list_servers(&self, selector: &str) -> CloudResult<Vec<Node>> {
        self.state.lock().unwrap().selectors.push(selector.to_string());
        let pool = selector
            .split(',')
            .next()
            .and_then(|kv| kv.split('=').nth(1))
            .unwrap_or_default();
        Ok(self.discovered.get(pool).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct FakeMachineApi {
    bootstraps: Mutex<Vec<String>>,
    applies: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MachineApi for FakeMachineApi {
    async fn apply_configuration(&self, node: &Node, user_data: &str) -> anyhow::Result<()> {
        self.applies
            .lock()
            .unwrap()
            .push((node.name.clone(), user_data.to_string()));
        Ok(())
    }

    async fn bootstrap(&self, node: &Node) -> anyhow::Result<()> {
        self.bootstraps.lock().unwrap().push(node.name.clone());
        Ok(())
    }

    async fn retrieve_kubeconfig(
        &self,
        node: &Node,
        _cert_renewal_duration: &str,
    ) -> anyhow::Result<String> {
        Ok(format!("kubeconfig-from-{}", node.ipv4))
    }
}

/// Shared event log spanning upgrades and chart deploys.
#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

struct LoggingRunner<'a>(&'a EventLog);

#[async_trait]
impl UpgradeRunner for LoggingRunner<'_> {
    async fn upgrade(&self, task: &UpgradeTask) -> anyhow::Result<()> {
        self.0
            .0
            .lock()
            .unwrap()
            .push(format!("upgrade:{}", task.node_name));
        Ok(())
    }
}

struct LoggingDeployer<'a>(&'a EventLog);

#[async_trait]
impl ChartDeployer for LoggingDeployer<'_> {
    async fn apply_secret(
        &self,
        _namespace: &str,
        name: &str,
        _data: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        self.0.0.lock().unwrap().push(format!("secret:{name}"));
        Ok(())
    }

    async fn deploy(&self, release: &ChartRelease) -> anyhow::Result<()> {
        self.0
            .0
            .lock()
            .unwrap()
            .push(format!("deploy:{}", release.name));
        Ok(())
    }
}

// ── Config fixtures ───────────────────────────────────────────────

fn talos_settings() -> TalosSettings {
    TalosSettings {
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
    }
}

fn cp_pool(count: u32, server_size: &str, region: &str) -> ControlPlanePoolConfig {
    ControlPlanePoolConfig {
        count,
        server_size: server_size.to_string(),
        arch: None,
        region: region.to_string(),
        enable_backup: false,
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
        taints: Vec::new(),
    }
}

/// Scenario A: two control-plane pools (counts 1 and 2), one worker pool
/// (count 2, autoscaler 1..5), load balancer enabled.
fn scenario_a_config() -> ClusterConfig {
    ClusterConfig {
        cluster_name: "test".to_string(),
        hetzner: HetznerSettings {
            token: "token".to_string(),
        },
        network: NetworkSettings::default(),
        firewall: FirewallSettings::default(),
        talos: talos_settings(),
        control_plane: ControlPlaneSettings {
            disable_load_balancer: false,
            load_balancer_type: "lb11".to_string(),
            load_balancer_location: None,
            pools: vec![cp_pool(1, "cx22", "nbg1"), cp_pool(2, "cx32", "fsn1")],
        },
        worker_pools: WorkerPoolSettings {
            pools: vec![NodePoolConfig {
                name: "pool-a".to_string(),
                count: 2,
                server_size: "cx22".to_string(),
                arch: None,
                region: "nbg1".to_string(),
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
                taints: Vec::new(),
                autoscaler: Some(AutoscalerBounds { min: 1, max: 5 }),
            }],
            force_export_autoscaler_config: false,
            skip_autoscaler_discovery: false,
        },
        addons: AddOnSettings {
            cluster_autoscaler: ChartSettings {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        },
    }
}

/// Scenario B: load balancer disabled, no VPN CIDRs, single node.
fn scenario_b_config() -> ClusterConfig {
    let mut cfg = scenario_a_config();
    cfg.control_plane.disable_load_balancer = true;
    cfg.control_plane.pools = vec![cp_pool(1, "cx22", "nbg1")];
    cfg.worker_pools.pools.clear();
    cfg.addons = AddOnSettings::default();
    cfg
}

// ── Tests ─────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_provisions_the_full_fleet() {
    let mut cloud = FakeCloud::default();
    cloud.discovered.insert(
        "pool-a".to_string(),
        vec![Node {
            id: "srv-ext".to_string(),
            name: "pool-a-scaled-xyz".to_string(),
            ipv4: "10.0.9.1".to_string(),
            image: "img-old".to_string(),
        }],
    );
    let api = FakeMachineApi::default();
    let events = EventLog::default();
    let runner = LoggingRunner(&events);
    let deployer = LoggingDeployer(&events);

    let mut provisioner = ClusterProvisioner::new(
        scenario_a_config(),
        &cloud,
        &api,
        &RcgenSecretsSource,
        &runner,
        &deployer,
    )
    .unwrap();
    let mut ledger = ProvisionLedger::default();
    let cluster = provisioner.run(&mut ledger).await.unwrap();

    // Load balancer address is the endpoint.
    assert_eq!(
        cluster.endpoint,
        ClusterEndpoint::LoadBalancer("203.0.113.1".to_string())
    );

    // The anchor is the first pool's first node.
    let anchor = &cluster.control_plane_pools[0].nodes[0];
    assert_eq!(anchor.name, "controlplane-nbg1-cx22-0");

    // Client descriptor lists 3 control-plane endpoints and 5 fleet nodes.
    let descriptor: serde_json::Value = serde_json::from_str(&cluster.talosconfig).unwrap();
    let context = &descriptor["contexts"]["test"];
    assert_eq!(context["endpoints"].as_array().unwrap().len(), 3);
    assert_eq!(context["nodes"].as_array().unwrap().len(), 5);

    // Exactly one autoscaling group with the configured bounds.
    let export = cluster.autoscaler_export.as_ref().unwrap();
    assert_eq!(export.groups.len(), 1);
    assert_eq!(export.groups[0].name, "pool-a");
    assert_eq!(export.groups[0].min_size, 1);
    assert_eq!(export.groups[0].max_size, 5);
    assert!(export.secret_data.contains_key("HCLOUD_CLUSTER_CONFIG"));

    // Bootstrap hit the anchor exactly once.
    assert_eq!(
        *api.bootstraps.lock().unwrap(),
        vec!["controlplane-nbg1-cx22-0".to_string()]
    );

    // Upgrades form one chain: control plane, then static workers, then
    // the discovered node — and every upgrade precedes every deploy.
    let events = events.0.lock().unwrap().clone();
    let upgrades: Vec<&str> = events
        .iter()
        .filter_map(|e| e.strip_prefix("upgrade:"))
        .collect();
    assert_eq!(
        upgrades,
        vec![
            "controlplane-nbg1-cx22-0",
            "controlplane-fsn1-cx32-0",
            "controlplane-fsn1-cx32-1",
            "pool-a-0",
            "pool-a-1",
            "pool-a-scaled-xyz",
        ]
    );
    let last_upgrade = events.iter().rposition(|e| e.starts_with("upgrade:")).unwrap();
    let first_deploy = events.iter().position(|e| e.starts_with("deploy:")).unwrap();
    assert!(last_upgrade < first_deploy);
    assert!(events.contains(&"deploy:cluster-autoscaler".to_string()));

    // The companion secret lands before the chart that mounts it.
    let secret_idx = events
        .iter()
        .position(|e| e == "secret:hcloud-autoscaler")
        .unwrap();
    let chart_idx = events
        .iter()
        .position(|e| e == "deploy:cluster-autoscaler")
        .unwrap();
    assert!(secret_idx < chart_idx);

    // The discovered node received the ongoing configuration too.
    let applies = api.applies.lock().unwrap();
    assert!(applies.iter().any(|(name, _)| name == "pool-a-scaled-xyz"));
}

#[tokio::test]
async fn rerunning_skips_bootstrap_and_unchanged_upgrades() {
    let cloud = FakeCloud::default();
    let api = FakeMachineApi::default();
    let events = EventLog::default();
    let runner = LoggingRunner(&events);
    let deployer = LoggingDeployer(&events);

    let mut ledger = ProvisionLedger::default();
    let mut provisioner = ClusterProvisioner::new(
        scenario_a_config(),
        &cloud,
        &api,
        &RcgenSecretsSource,
        &runner,
        &deployer,
    )
    .unwrap();
    provisioner.run(&mut ledger).await.unwrap();

    let upgrades_after_first = events
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("upgrade:"))
        .count();

    // Fresh evaluation of the same configuration against the same ledger.
    // The fake cloud keeps addresses and images stable per creation order,
    // so every upgrade tuple is unchanged.
    let cloud2 = FakeCloud::default();
    let mut provisioner = ClusterProvisioner::new(
        scenario_a_config(),
        &cloud2,
        &api,
        &RcgenSecretsSource,
        &runner,
        &deployer,
    )
    .unwrap();
    provisioner.run(&mut ledger).await.unwrap();

    assert_eq!(api.bootstraps.lock().unwrap().len(), 1);
    let upgrades_after_second = events
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("upgrade:"))
        .count();
    assert_eq!(upgrades_after_first, upgrades_after_second);
}

#[tokio::test]
async fn scenario_b_uses_the_anchor_address_as_endpoint() {
    let cloud = FakeCloud::default();
    let api = FakeMachineApi::default();
    let events = EventLog::default();
    let runner = LoggingRunner(&events);
    let deployer = LoggingDeployer(&events);

    let mut provisioner = ClusterProvisioner::new(
        scenario_b_config(),
        &cloud,
        &api,
        &RcgenSecretsSource,
        &runner,
        &deployer,
    )
    .unwrap();
    let mut ledger = ProvisionLedger::default();
    let cluster = provisioner.run(&mut ledger).await.unwrap();

    let anchor_ip = cluster.control_plane_pools[0].nodes[0].ipv4.clone();
    assert_eq!(cluster.endpoint, ClusterEndpoint::AnchorNode(anchor_ip.clone()));

    let state = cloud.state.lock().unwrap();

    // No load balancer was created.
    assert!(state.load_balancers.is_empty());

    // The anchor boots unconfigured; its configuration arrives through the
    // machine API once the endpoint is known.
    assert!(state.servers[0].user_data.is_empty());
    let applies = api.applies.lock().unwrap();
    let (first_applied, user_data) = &applies[0];
    assert_eq!(first_applied, "controlplane-nbg1-cx22-0");
    assert!(user_data.contains(&format!("endpoint: https://{anchor_ip}:6443")));

    // Without VPN CIDRs the firewall compensates by opening the cluster
    // API port to everyone.
    let cp_firewall = state
        .firewalls
        .iter()
        .find(|f| f.name.contains("controlplane"))
        .unwrap();
    let api_rule = cp_firewall
        .rules
        .iter()
        .find(|r| r.port.as_deref() == Some("6443"))
        .expect("kubernetes api rule");
    assert_eq!(api_rule.source_ips, vec!["0.0.0.0/0", "::/0"]);
}

#[tokio::test]
async fn autoscaler_discovery_on_control_plane_pool_fails_fast() {
    let cloud = FakeCloud::default();
    let api = FakeMachineApi::default();
    let events = EventLog::default();
    let runner = LoggingRunner(&events);
    let deployer = LoggingDeployer(&events);

    let provisioner = ClusterProvisioner::new(
        scenario_a_config(),
        &cloud,
        &api,
        &RcgenSecretsSource,
        &runner,
        &deployer,
    )
    .unwrap();

    let pool = ProvisionedPool {
        name: "controlplane-nbg1-cx22".to_string(),
        role: NodeRole::ControlPlane,
        nodes: Vec::new(),
        discovered: Vec::new(),
        ongoing_patches: Vec::new(),
    };
    let err = provisioner.discover_autoscaler_nodes(&pool).await.unwrap_err();
    match err {
        ProvisionError::AutoscalerDiscoveryOnControlPlane { pool } => {
            assert_eq!(pool, "controlplane-nbg1-cx22");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn worker_pools_without_bounds_still_export_node_configs() {
    let mut cfg = scenario_a_config();
    cfg.worker_pools.pools.push(NodePoolConfig {
        name: "pool-b".to_string(),
        count: 1,
        server_size: "cax11".to_string(),
        arch: None,
        region: "fsn1".to_string(),
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
        taints: Vec::new(),
        autoscaler: None,
    });

    let cloud = FakeCloud::default();
    let api = FakeMachineApi::default();
    let events = EventLog::default();
    let runner = LoggingRunner(&events);
    let deployer = LoggingDeployer(&events);

    let mut provisioner = ClusterProvisioner::new(
        cfg,
        &cloud,
        &api,
        &RcgenSecretsSource,
        &runner,
        &deployer,
    )
    .unwrap();
    let mut ledger = ProvisionLedger::default();
    let cluster = provisioner.run(&mut ledger).await.unwrap();

    let export = cluster.autoscaler_export.as_ref().unwrap();
    // Both pools have templates; only pool-a has a scaling group.
    assert!(export.cluster_config.node_configs.contains_key("pool-a"));
    assert!(export.cluster_config.node_configs.contains_key("pool-b"));
    assert_eq!(export.groups.len(), 1);

    // pool-b is ARM, so both architectures were uploaded.
    let state = cloud.state.lock().unwrap();
    assert_eq!(state.images.len(), 2);
}

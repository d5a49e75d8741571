//! The fleet-wide upgrade queue.
//!
//! Upgrading a node reboots it. Rebooting several control-plane nodes at
//! once risks losing etcd quorum, and rebooting a whole worker pool evicts
//! every workload on it simultaneously — so upgrades across the entire
//! fleet (control plane, workers, and autoscaler-discovered nodes) form a
//! single linear chain and execute strictly one at a time.
//!
//! The queue is an owned value: callers create one per provisioning run
//! and nothing leaks between runs. Whether a task actually executes is
//! decided by its re-trigger key — re-enqueuing an unchanged
//! {version, images, address, node image} tuple in a fresh run is a no-op.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use basalt_hcloud::Node;

use crate::error::{ProvisionError, ProvisionResult};

/// Cluster-wide inputs shared by every upgrade task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeContext {
    /// Path the external upgrade procedure writes the client descriptor
    /// to.
    pub talosconfig_path: String,
    /// The client descriptor itself.
    pub talosconfig_value: String,
    /// Target OS version.
    pub talos_version: String,
    /// Factory schematic id of the target image.
    pub talos_image: String,
    /// Uploaded image id per architecture.
    pub arm_image: String,
    pub x86_image: String,
}

/// One upgrade action on one node.
///
/// `env` is the full contract the external upgrade procedure consumes;
/// `key` is the re-trigger tuple — any change to it forces re-execution,
/// an unchanged key is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeTask {
    /// Node name, for logs and error messages.
    pub node_name: String,
    /// Environment contract for the external upgrade procedure.
    pub env: BTreeMap<String, String>,
    /// Re-trigger key: {TALOS_VERSION, ARM_IMAGE, X86_IMAGE, NODE_IP,
    /// NODE_IMAGE}.
    pub key: String,
}

/// Executes a single node upgrade. External collaborator; basalt only
/// sequences the calls.
#[async_trait]
pub trait UpgradeRunner: Send + Sync {
    async fn upgrade(&self, task: &UpgradeTask) -> anyhow::Result<()>;
}

/// Completed upgrade keys, carried across runs by the caller.
///
/// This is what makes a re-run with unchanged inputs a no-op: a key
/// already present is skipped, a changed key re-executes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedUpgrades(BTreeSet<String>);

impl CompletedUpgrades {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn record(&mut self, key: &str) {
        self.0.insert(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The serialized upgrade chain for one provisioning run.
#[derive(Debug)]
pub struct UpgradeQueue {
    context: UpgradeContext,
    tasks: Vec<UpgradeTask>,
}

impl UpgradeQueue {
    pub fn new(context: UpgradeContext) -> Self {
        Self {
            context,
            tasks: Vec::new(),
        }
    }

    /// Append a task for a node. Each task implicitly depends on every
    /// task enqueued before it; callers enqueue control-plane pools before
    /// worker pools, and statically provisioned nodes before discovered
    /// ones.
    pub fn enqueue(&mut self, node: &Node) {
        let ctx = &self.context;
        let key = [
            ctx.talos_version.as_str(),
            ctx.arm_image.as_str(),
            ctx.x86_image.as_str(),
            node.ipv4.as_str(),
            node.image.as_str(),
        ]
        .join("|");

        let env = BTreeMap::from([
            ("TALOSCONFIG".to_string(), ctx.talosconfig_path.clone()),
            ("TALOSCONFIG_VALUE".to_string(), ctx.talosconfig_value.clone()),
            ("TALOS_VERSION".to_string(), ctx.talos_version.clone()),
            ("TALOS_IMAGE".to_string(), ctx.talos_image.clone()),
            ("ARM_IMAGE".to_string(), ctx.arm_image.clone()),
            ("X86_IMAGE".to_string(), ctx.x86_image.clone()),
            ("NODE_NAME".to_string(), node.name.clone()),
            ("NODE_IP".to_string(), node.ipv4.clone()),
            ("NODE_IMAGE".to_string(), node.image.clone()),
        ]);

        debug!(node = %node.name, position = self.tasks.len(), "enqueued upgrade task");
        self.tasks.push(UpgradeTask {
            node_name: node.name.clone(),
            env,
            key,
        });
    }

    /// The chain, in execution order.
    pub fn tasks(&self) -> &[UpgradeTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Execute the chain strictly in order.
    ///
    /// Tasks whose key is already in `completed` are skipped. The first
    /// failure halts the chain; completed work stays recorded so a re-run
    /// resumes behind it.
    pub async fn run(
        &self,
        runner: &dyn UpgradeRunner,
        completed: &mut CompletedUpgrades,
    ) -> ProvisionResult<()> {
        for task in &self.tasks {
            if completed.contains(&task.key) {
                debug!(node = %task.node_name, "upgrade unchanged, skipping");
                continue;
            }
            info!(node = %task.node_name, version = %self.context.talos_version, "upgrading node");
            runner
                .upgrade(task)
                .await
                .map_err(|source| ProvisionError::Upgrade {
                    node: task.node_name.clone(),
                    source,
                })?;
            completed.record(&task.key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn context() -> UpgradeContext {
        UpgradeContext {
            talosconfig_path: "test.talosconfig.json".to_string(),
            talosconfig_value: "{}".to_string(),
            talos_version: "v1.9.2".to_string(),
            talos_image: "abc123".to_string(),
            arm_image: "101".to_string(),
            x86_image: "102".to_string(),
        }
    }

    fn node(name: &str, ip: &str) -> Node {
        Node {
            id: format!("id-{name}"),
            name: name.to_string(),
            ipv4: ip.to_string(),
            image: "100".to_string(),
        }
    }

    /// Records upgrade order; optionally fails on a given node.
    struct RecordingRunner {
        upgraded: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                upgraded: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl UpgradeRunner for RecordingRunner {
        async fn upgrade(&self, task: &UpgradeTask) -> anyhow::Result<()> {
            if self.fail_on.as_deref() == Some(task.node_name.as_str()) {
                anyhow::bail!("boom");
            }
            self.upgraded.lock().unwrap().push(task.node_name.clone());
            Ok(())
        }
    }

    #[test]
    fn enqueue_builds_one_linear_chain_in_order() {
        let mut queue = UpgradeQueue::new(context());
        for i in 0..5 {
            queue.enqueue(&node(&format!("node-{i}"), &format!("10.0.0.{i}")));
        }

        assert_eq!(queue.len(), 5);
        let names: Vec<&str> = queue.tasks().iter().map(|t| t.node_name.as_str()).collect();
        assert_eq!(names, vec!["node-0", "node-1", "node-2", "node-3", "node-4"]);
    }

    #[test]
    fn task_env_carries_the_full_contract() {
        let mut queue = UpgradeQueue::new(context());
        queue.enqueue(&node("node-a", "10.0.0.1"));

        let env = &queue.tasks()[0].env;
        for key in [
            "TALOSCONFIG",
            "TALOSCONFIG_VALUE",
            "TALOS_VERSION",
            "TALOS_IMAGE",
            "ARM_IMAGE",
            "X86_IMAGE",
            "NODE_NAME",
            "NODE_IP",
            "NODE_IMAGE",
        ] {
            assert!(env.contains_key(key), "missing {key}");
        }
        assert_eq!(env["NODE_IP"], "10.0.0.1");
        assert_eq!(env["TALOS_VERSION"], "v1.9.2");
    }

    #[tokio::test]
    async fn run_executes_in_enqueue_order() {
        let mut queue = UpgradeQueue::new(context());
        queue.enqueue(&node("cp-0", "10.0.0.1"));
        queue.enqueue(&node("worker-0", "10.0.0.2"));

        let runner = RecordingRunner::new();
        let mut completed = CompletedUpgrades::new();
        queue.run(&runner, &mut completed).await.unwrap();

        assert_eq!(
            *runner.upgraded.lock().unwrap(),
            vec!["cp-0".to_string(), "worker-0".to_string()]
        );
        assert_eq!(completed.len(), 2);
    }

    #[tokio::test]
    async fn unchanged_tasks_are_skipped_on_rerun() {
        let runner = RecordingRunner::new();
        let mut completed = CompletedUpgrades::new();

        let mut queue = UpgradeQueue::new(context());
        queue.enqueue(&node("cp-0", "10.0.0.1"));
        queue.run(&runner, &mut completed).await.unwrap();

        // Fresh run, identical tuple: no-op.
        let mut queue = UpgradeQueue::new(context());
        queue.enqueue(&node("cp-0", "10.0.0.1"));
        queue.run(&runner, &mut completed).await.unwrap();

        assert_eq!(runner.upgraded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn changed_version_forces_reexecution() {
        let runner = RecordingRunner::new();
        let mut completed = CompletedUpgrades::new();

        let mut queue = UpgradeQueue::new(context());
        queue.enqueue(&node("cp-0", "10.0.0.1"));
        queue.run(&runner, &mut completed).await.unwrap();

        let mut ctx = context();
        ctx.talos_version = "v1.9.3".to_string();
        let mut queue = UpgradeQueue::new(ctx);
        queue.enqueue(&node("cp-0", "10.0.0.1"));
        queue.run(&runner, &mut completed).await.unwrap();

        assert_eq!(runner.upgraded.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failure_halts_the_chain_and_keeps_progress() {
        let mut queue = UpgradeQueue::new(context());
        queue.enqueue(&node("a", "10.0.0.1"));
        queue.enqueue(&node("b", "10.0.0.2"));
        queue.enqueue(&node("c", "10.0.0.3"));

        let runner = RecordingRunner {
            upgraded: Mutex::new(Vec::new()),
            fail_on: Some("b".to_string()),
        };
        let mut completed = CompletedUpgrades::new();
        let err = queue.run(&runner, &mut completed).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Upgrade { ref node, .. } if node == "b"));
        // "a" completed; "b" and "c" did not.
        assert_eq!(completed.len(), 1);
        assert_eq!(*runner.upgraded.lock().unwrap(), vec!["a".to_string()]);
    }
}

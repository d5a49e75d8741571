//! basalt-provision — cluster provisioning and upgrade orchestration.
//!
//! This crate drives a declarative [`basalt_config::ClusterConfig`] to a
//! running cluster:
//!
//! - **`coordinator`** — the bootstrap coordinator: dependency-ordered
//!   resource creation, one-time cluster bootstrap on the anchor node,
//!   config application, upgrades, add-ons
//! - **`upgrade`** — the fleet-wide upgrade queue: one strict global chain,
//!   keyed so unchanged nodes are no-ops on re-runs
//! - **`autoscaler`** — the autoscaler config exporter: deterministic JSON
//!   plus a content hash for cheap change detection
//! - **`secrets`** — one-shot cluster secrets behind the `SecretsSource`
//!   seam
//! - **`addons`** — add-on chart value computation (deployment is the
//!   chart collaborator's job)
//!
//! Failure semantics: the first error halts the run; nothing rolls back.
//! Re-running is safe — resource creation, config application and the
//! exporter are idempotent, and the one-time steps (bootstrap,
//! disk-encryption enrollment) are guarded through [`ProvisionLedger`].

pub mod addons;
pub mod api;
pub mod autoscaler;
pub mod coordinator;
pub mod error;
pub mod secrets;
pub mod talosconfig;
pub mod upgrade;

pub use addons::{
    AUTOSCALER_SECRET_NAME, ChartDeployer, ChartRelease, HCLOUD_SECRET_NAME,
    compute_addon_releases, hcloud_secret_data,
};
pub use api::MachineApi;
pub use autoscaler::{AutoscalerExport, AutoscalingGroup, export_autoscaler_config};
pub use coordinator::{
    ClusterProvisioner, ProvisionLedger, ProvisionPhase, ProvisionedCluster, ProvisionedPool,
};
pub use error::{ProvisionError, ProvisionResult};
pub use secrets::{RcgenSecretsSource, SecretsSource};
pub use talosconfig::{client_descriptor, talosconfig_path};
pub use upgrade::{CompletedUpgrades, UpgradeContext, UpgradeQueue, UpgradeRunner, UpgradeTask};

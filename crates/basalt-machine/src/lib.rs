//! basalt-machine — Talos machine-configuration synthesis.
//!
//! Turns a node role, a configuration phase, and the cluster's feature
//! toggles into the ordered list of OS configuration documents a node
//! receives: the main machine config, plus LUKS2 volume documents for
//! partitions marked for encryption.
//!
//! The split between phases matters: the **bootstrap** document is applied
//! exactly once at node creation and carries irreversible settings
//! (disk-encryption key enrollment); the **ongoing** document supersedes it
//! for every later update and must never re-enroll.
//!
//! Synthesis is pure and deterministic — identical input produces
//! byte-identical YAML (all maps are ordered).

pub mod document;
pub mod error;
pub mod factory;
pub mod secrets;
pub mod synthesizer;
pub mod volume;

pub use document::MachineConfigDoc;
pub use error::{MachineError, MachineResult};
pub use factory::{ClusterEndpoint, MachineConfigFactory, KUBERNETES_API_PORT};
pub use secrets::ClusterSecrets;
pub use synthesizer::{
    ConfigPhase, DocumentKind, MachineConfigDocument, NodeConfigSpec, NodeRole, serialize_taints,
    synthesize,
};
pub use volume::VolumeConfigDoc;

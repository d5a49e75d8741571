//! basalt-config — declarative cluster configuration for basalt.
//!
//! This crate holds the caller-owned description of a cluster: node pools,
//! network layout, firewall policy, and Talos feature toggles. The rest of
//! basalt reads these types but never mutates them after
//! [`ClusterConfig::normalize`] has run.
//!
//! Validation here is fail-fast and names the offending pool or field;
//! downstream crates (the machine-config synthesizer in particular) assume
//! pre-validated input.

pub mod arch;
pub mod error;
pub mod types;

pub use arch::{CpuArchitecture, infer_architecture};
pub use error::{ConfigError, ConfigResult};
pub use types::*;

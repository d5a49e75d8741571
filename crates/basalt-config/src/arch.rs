//! CPU architecture handling.
//!
//! Hetzner encodes the architecture in the server type prefix, so pools may
//! omit `arch` and have it inferred during normalization.

use std::fmt;

use serde::{Deserialize, Serialize};

/// CPU architecture of a node image and the servers that boot it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuArchitecture {
    /// 64-bit ARM (Hetzner `cax*` server types).
    Arm64,
    /// x86-64 (Hetzner `cx*`, `ccx*`, `cpx*` server types).
    Amd64,
}

impl fmt::Display for CpuArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuArchitecture::Arm64 => write!(f, "arm64"),
            CpuArchitecture::Amd64 => write!(f, "amd64"),
        }
    }
}

/// Infer the CPU architecture from a Hetzner server size.
///
/// `cax*` is the ARM line; `cx*`, `ccx*` and `cpx*` are x86. Unknown
/// prefixes fall back to x86, matching Hetzner's catalog where ARM is the
/// single dedicated line.
pub fn infer_architecture(server_size: &str) -> CpuArchitecture {
    if server_size.starts_with("cax") {
        return CpuArchitecture::Arm64;
    }
    CpuArchitecture::Amd64
}

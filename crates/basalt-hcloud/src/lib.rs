//! basalt-hcloud — the Hetzner Cloud collaborator boundary.
//!
//! basalt never talks to the Hetzner API directly; every cloud resource is
//! created through the [`CloudProvider`] trait defined here. This crate
//! also owns the pure parts of that boundary: firewall rule construction,
//! resource labels and selectors, and Talos factory image selection.
//!
//! Upstream API errors propagate unchanged ([`CloudError::Api`]); nothing
//! here retries.

pub mod error;
pub mod firewall;
pub mod image;
pub mod labels;
pub mod provider;

pub use error::{CloudError, CloudResult};
pub use firewall::{FirewallRule, TALOS_API_PORT, TALOS_TRUSTD_PORT};
pub use image::{Images, factory_image_url, required_architectures, talos_image_id};
pub use provider::{
    CloudProvider, FirewallHandle, FirewallSpec, ImageHandle, ImageSpec, LoadBalancerHandle,
    LoadBalancerSpec, NetworkHandle, NetworkSpec, Node, PlacementGroupHandle, PlacementGroupSpec,
    ServerSpec,
};

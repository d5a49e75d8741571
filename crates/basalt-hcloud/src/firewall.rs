//! Firewall rule construction for both node roles.
//!
//! Control-plane nodes expose the Talos API (50000) and trustd (50001) to
//! the configured VPN CIDRs; workers expose only the Talos API. When the
//! cluster runs without a load balancer the Kubernetes API port must be
//! reachable directly on the control-plane nodes — to the VPN CIDRs if any
//! are configured, otherwise to everyone. That fallback is unsafe for
//! production and exists for single-node and CI setups.

use basalt_config::{
    CustomFirewallRule, FirewallSettings, KUBERNETES_API_PORT, RuleDirection, RuleProtocol,
};
use serde::{Deserialize, Serialize};

/// Talos machine API port.
pub const TALOS_API_PORT: u16 = 50000;
/// Talos trustd port (control plane only).
pub const TALOS_TRUSTD_PORT: u16 = 50001;

const EVERYONE: [&str; 2] = ["0.0.0.0/0", "::/0"];

/// One firewall rule in provider-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub description: String,
    pub direction: RuleDirection,
    pub protocol: RuleProtocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_ips: Vec<String>,
}

impl FirewallRule {
    fn tcp_in(description: &str, port: u16, sources: &[String]) -> Self {
        Self {
            description: description.to_string(),
            direction: RuleDirection::In,
            protocol: RuleProtocol::Tcp,
            port: Some(port.to_string()),
            source_ips: sources.to_vec(),
            destination_ips: Vec::new(),
        }
    }
}

/// Rules for control-plane nodes.
///
/// `expose_kubernetes_api` must be set exactly when the load balancer is
/// disabled, so clients can still reach the cluster API on the nodes
/// themselves.
pub fn control_plane_rules(
    settings: &FirewallSettings,
    expose_kubernetes_api: bool,
) -> Vec<FirewallRule> {
    let mut rules = Vec::new();

    for cidr in &settings.vpn_cidrs {
        let src = vec![cidr.clone()];
        for port in [TALOS_API_PORT, TALOS_TRUSTD_PORT] {
            rules.push(FirewallRule::tcp_in("VPN: Talos API", port, &src));
        }
        if expose_kubernetes_api {
            rules.push(FirewallRule::tcp_in(
                "VPN: Kubernetes API (no load balancer)",
                KUBERNETES_API_PORT,
                &src,
            ));
        }
    }

    if settings.open_talos_api {
        let all: Vec<String> = EVERYONE.iter().map(|s| s.to_string()).collect();
        for port in [TALOS_API_PORT, TALOS_TRUSTD_PORT] {
            rules.push(FirewallRule::tcp_in("Public: Talos API", port, &all));
        }
    }

    // No VPN CIDRs to scope the API down to: open it to everyone.
    if expose_kubernetes_api && settings.vpn_cidrs.is_empty() {
        let all: Vec<String> = EVERYONE.iter().map(|s| s.to_string()).collect();
        rules.push(FirewallRule::tcp_in(
            "Public: Kubernetes API (no load balancer)",
            KUBERNETES_API_PORT,
            &all,
        ));
    }

    rules.extend(settings.custom_rules_control_plane.iter().map(custom_rule));
    rules
}

/// Rules for worker nodes.
pub fn worker_rules(settings: &FirewallSettings) -> Vec<FirewallRule> {
    let mut rules = Vec::new();

    for cidr in &settings.vpn_cidrs {
        rules.push(FirewallRule::tcp_in(
            "VPN: Talos API",
            TALOS_API_PORT,
            &[cidr.clone()],
        ));
    }

    if settings.open_talos_api {
        let all: Vec<String> = EVERYONE.iter().map(|s| s.to_string()).collect();
        rules.push(FirewallRule::tcp_in("Public: Talos API", TALOS_API_PORT, &all));
    }

    rules.extend(settings.custom_rules_worker.iter().map(custom_rule));
    rules
}

/// Convert a caller-supplied rule. Validation (port/source/destination
/// presence) has already run in basalt-config.
fn custom_rule(rule: &CustomFirewallRule) -> FirewallRule {
    let description = rule.description.clone().unwrap_or_else(|| {
        format!(
            "Custom: {} {}",
            rule.protocol,
            rule.port.as_deref().unwrap_or("any")
        )
    });
    FirewallRule {
        description,
        direction: rule.direction,
        protocol: rule.protocol,
        port: rule.port.clone(),
        source_ips: rule.source_ips.clone(),
        destination_ips: rule.destination_ips.clone(),
    }
}

//! Cluster client descriptor (talosconfig).
//!
//! A JSON document handing the Talos CLI everything it needs to reach the
//! fleet: control-plane endpoints, the full node list, and the client
//! credentials. Field order is fixed by struct declaration so the emitted
//! text is stable across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use basalt_machine::ClusterSecrets;

use crate::error::ProvisionResult;

/// The full descriptor: a named default context plus the context table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub context: String,
    pub contexts: BTreeMap<String, ClientContext>,
}

/// One context: who to talk to and how to authenticate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientContext {
    /// Control-plane addresses.
    pub endpoints: Vec<String>,
    /// Every fleet node address.
    pub nodes: Vec<String>,
    /// Base64-encoded CA certificate.
    pub ca: String,
    /// Base64-encoded client certificate.
    pub crt: String,
    /// Base64-encoded client key.
    pub key: String,
}

/// Render the client descriptor JSON for a cluster.
///
/// `endpoints` must list the control-plane addresses and `nodes` the whole
/// fleet, both in pool/index order; neither list may be read before every
/// contributing pool has finished appending.
pub fn client_descriptor(
    context: &str,
    endpoints: &[String],
    nodes: &[String],
    secrets: &ClusterSecrets,
) -> ProvisionResult<String> {
    let descriptor = ClientDescriptor {
        context: context.to_string(),
        contexts: BTreeMap::from([(
            context.to_string(),
            ClientContext {
                endpoints: endpoints.to_vec(),
                nodes: nodes.to_vec(),
                ca: secrets.ca_crt.clone(),
                crt: secrets.client_crt.clone(),
                key: secrets.client_key.clone(),
            },
        )]),
    };
    Ok(serde_json::to_string(&descriptor)?)
}

/// File name the Talos CLI reads the descriptor from.
pub fn talosconfig_path(cluster_name: &str) -> String {
    format!("{cluster_name}.talosconfig.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> ClusterSecrets {
        ClusterSecrets {
            ca_crt: "Y2E=".to_string(),
            ca_key: "Y2FrZXk=".to_string(),
            client_crt: "Y3J0".to_string(),
            client_key: "a2V5".to_string(),
            bootstrap_token: "token".to_string(),
            cluster_id: "id".to_string(),
            cluster_secret: "secret".to_string(),
        }
    }

    #[test]
    fn descriptor_matches_expected_shape() {
        let json = client_descriptor(
            "prod",
            &["1.2.3.4".to_string()],
            &["1.2.3.4".to_string(), "5.6.7.8".to_string()],
            &secrets(),
        )
        .unwrap();

        assert_eq!(
            json,
            r#"{"context":"prod","contexts":{"prod":{"endpoints":["1.2.3.4"],"nodes":["1.2.3.4","5.6.7.8"],"ca":"Y2E=","crt":"Y3J0","key":"a2V5"}}}"#
        );
    }

    #[test]
    fn descriptor_round_trips() {
        let json = client_descriptor("prod", &[], &[], &secrets()).unwrap();
        let parsed: ClientDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.context, "prod");
        assert!(parsed.contexts.contains_key("prod"));
        assert!(parsed.contexts["prod"].endpoints.is_empty());
    }

    #[test]
    fn path_is_derived_from_cluster_name() {
        assert_eq!(talosconfig_path("prod"), "prod.talosconfig.json");
    }
}

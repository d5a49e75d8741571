//! Cluster-wide cryptographic material.
//!
//! Created exactly once per cluster, before any configuration synthesis,
//! and shared read-only by every node's configuration. Generation lives
//! behind the `SecretsSource` seam in basalt-provision; this type is only
//! the material itself.

use serde::{Deserialize, Serialize};

use crate::document::CertificatePairSection;

/// One-shot cluster secrets: PKI material plus join tokens.
///
/// All certificate and key fields are base64-encoded PEM, the encoding the
/// machine configuration and the client descriptor both carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSecrets {
    /// Cluster CA certificate (base64 PEM).
    pub ca_crt: String,
    /// Cluster CA private key (base64 PEM).
    pub ca_key: String,
    /// Client certificate for cluster API access (base64 PEM).
    pub client_crt: String,
    /// Client private key for cluster API access (base64 PEM).
    pub client_key: String,
    /// Machine join token.
    pub bootstrap_token: String,
    /// Cluster identifier baked into every node's configuration.
    pub cluster_id: String,
    /// Shared cluster secret.
    pub cluster_secret: String,
}

impl ClusterSecrets {
    /// The CA pair in the shape the machine configuration embeds.
    pub fn ca_pair(&self) -> CertificatePairSection {
        CertificatePairSection {
            crt: self.ca_crt.clone(),
            key: self.ca_key.clone(),
        }
    }
}

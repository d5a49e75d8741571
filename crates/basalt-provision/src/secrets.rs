//! One-shot cluster secrets.
//!
//! `ClusterSecrets` is created exactly once per cluster, before any
//! machine configuration is synthesized; every node's configuration shares
//! it read-only. Generation sits behind the [`SecretsSource`] seam so
//! callers can plug in externally managed material.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use sha2::{Digest, Sha256};
use tracing::info;

use basalt_machine::ClusterSecrets;

use crate::error::{ProvisionError, ProvisionResult};

/// Generator of the one-shot cluster material.
pub trait SecretsSource: Send + Sync {
    fn generate(&self, cluster_name: &str) -> anyhow::Result<ClusterSecrets>;
}

/// Default secrets source: a self-signed cluster CA with a client
/// certificate signed by it, plus tokens derived from the CA key.
#[derive(Debug, Default)]
pub struct RcgenSecretsSource;

impl SecretsSource for RcgenSecretsSource {
    fn generate(&self, cluster_name: &str) -> anyhow::Result<ClusterSecrets> {
        let mut ca_params = CertificateParams::default();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, cluster_name);
        dn.push(DnType::CommonName, format!("{cluster_name} cluster CA"));
        ca_params.distinguished_name = dn;

        let ca_key = KeyPair::generate()?;
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let mut client_params = CertificateParams::default();
        let mut client_dn = DistinguishedName::new();
        client_dn.push(DnType::OrganizationName, cluster_name);
        client_dn.push(DnType::CommonName, "admin");
        client_params.distinguished_name = client_dn;

        let client_key = KeyPair::generate()?;
        let client_cert = client_params.signed_by(&client_key, &ca_cert, &ca_key)?;

        // Tokens and identifiers are derived from the (random) CA key so a
        // generated secret set is self-consistent without a second
        // entropy source.
        let digest = Sha256::digest(ca_key.serialize_der());
        let hexdigest = hex::encode(digest);
        let bootstrap_token = format!("{}.{}", &hexdigest[..6], &hexdigest[6..22]);
        let cluster_id = BASE64.encode(&digest[..16]);
        let cluster_secret = BASE64.encode(&digest[16..]);

        info!(cluster = %cluster_name, "generated cluster secrets");

        Ok(ClusterSecrets {
            ca_crt: BASE64.encode(ca_cert.pem()),
            ca_key: BASE64.encode(ca_key.serialize_pem()),
            client_crt: BASE64.encode(client_cert.pem()),
            client_key: BASE64.encode(client_key.serialize_pem()),
            bootstrap_token,
            cluster_id,
            cluster_secret,
        })
    }
}

/// Generate through a source, mapping the failure into the provisioning
/// error taxonomy.
pub(crate) fn generate_secrets(
    source: &dyn SecretsSource,
    cluster_name: &str,
) -> ProvisionResult<ClusterSecrets> {
    source
        .generate(cluster_name)
        .map_err(ProvisionError::Secrets)
}

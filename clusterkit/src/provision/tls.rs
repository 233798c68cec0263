//! Certificate authority and node certificate for the runtime's TLS channel

use std::time::{Duration, SystemTime};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, SanType,
};
use tracing::info;

use crate::errors::Result;
use crate::provision::credentials::CredentialLayout;

/// Host name put into node certificates; peers do not verify it
pub const NODE_DNS_NAME: &str = "clusterkit.internal";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// PEM encoded CA and node key pairs
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca_key_pem: String,
    pub ca_cert_pem: String,
    pub node_key_pem: String,
    pub node_cert_pem: String,
}

impl TlsMaterial {
    /// Write the four files; fails if any of them already exists
    pub async fn write(&self, layout: &CredentialLayout) -> Result<()> {
        CredentialLayout::ensure_absent(&layout.tls_files()).await?;

        layout.ca_key().create_private(&self.ca_key_pem).await?;
        layout.ca_cert().create_new(&self.ca_cert_pem).await?;
        layout.node_key().create_private(&self.node_key_pem).await?;
        layout.node_cert().create_new(&self.node_cert_pem).await?;

        info!("TLS material written to {}", layout.base_dir().display());
        Ok(())
    }
}

/// Produces a CA plus one node certificate signed by it
pub trait CertificateIssuer: Send + Sync {
    fn issue(&self, prefix: &str) -> Result<TlsMaterial>;
}

/// Issuer backed by rcgen
#[derive(Debug, Clone)]
pub struct RcgenIssuer {
    /// Validity of both certificates
    pub valid_days: u64,
}

impl Default for RcgenIssuer {
    fn default() -> Self {
        Self { valid_days: 365 * 2 }
    }
}

impl RcgenIssuer {
    fn subject(prefix: &str, organization: &str, common_name: Option<&str>) -> DistinguishedName {
        let mut name = DistinguishedName::new();
        name.push(DnType::CountryName, "GL");
        name.push(DnType::StateOrProvinceName, format!("{prefix} province"));
        name.push(DnType::LocalityName, format!("{prefix} locality"));
        name.push(DnType::OrganizationName, organization);
        if let Some(common_name) = common_name {
            name.push(DnType::CommonName, common_name);
        }
        name
    }

    fn validity(&self, params: &mut CertificateParams) {
        // backdated one day against clock skew between nodes
        let now = SystemTime::now();
        params.not_before = (now - DAY).into();
        params.not_after = (now + DAY * self.valid_days as u32).into();
    }
}

impl CertificateIssuer for RcgenIssuer {
    fn issue(&self, prefix: &str) -> Result<TlsMaterial> {
        let mut ca_params = CertificateParams::new(vec![])?;
        ca_params.distinguished_name =
            Self::subject(prefix, &format!("{prefix} organization"), Some(&format!("{prefix} CA")));
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        self.validity(&mut ca_params);

        let ca_key = KeyPair::generate()?;
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let mut node_params = CertificateParams::new(vec![])?;
        node_params.distinguished_name = Self::subject(prefix, &format!("{prefix} node"), None);
        node_params
            .subject_alt_names
            .push(SanType::DnsName(NODE_DNS_NAME.try_into()?));
        self.validity(&mut node_params);

        let node_key = KeyPair::generate()?;
        let node_cert = node_params.signed_by(&node_key, &ca_cert, &ca_key)?;

        Ok(TlsMaterial {
            ca_key_pem: ca_key.serialize_pem(),
            ca_cert_pem: ca_cert.pem(),
            node_key_pem: node_key.serialize_pem(),
            node_cert_pem: node_cert.pem(),
        })
    }
}

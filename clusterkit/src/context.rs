//! Collaborators shared by every cluster operation

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::cluster::config::ClusterConfig;
use crate::command::runner::{CommandRunner, ProcessRunner};
use crate::errors::Result;
use crate::provider::{CloudProvider, HetznerClient};
use crate::provision::credentials::CredentialLayout;
use crate::provision::tls::{CertificateIssuer, RcgenIssuer};

/// Provider, command runner, certificate issuer and local file layout
#[derive(Clone)]
pub struct ClusterContext {
    pub provider: Arc<dyn CloudProvider>,
    pub runner: Arc<dyn CommandRunner>,
    pub issuer: Arc<dyn CertificateIssuer>,
    pub layout: CredentialLayout,
    pub config: ClusterConfig,
}

impl ClusterContext {
    pub fn new(
        config: ClusterConfig,
        provider: Arc<dyn CloudProvider>,
        runner: Arc<dyn CommandRunner>,
        issuer: Arc<dyn CertificateIssuer>,
        layout: CredentialLayout,
    ) -> Self {
        Self {
            provider,
            runner,
            issuer,
            layout,
            config,
        }
    }

    /// Hetzner API, OS processes and rcgen, with credentials in the working directory
    pub fn production(config: ClusterConfig) -> Result<Self> {
        let provider = HetznerClient::from_env(&config.tokenvar)?;
        let layout = CredentialLayout::in_current_dir(config.prefix.clone())?;
        debug!("Credential files in {}", layout.base_dir().display());
        Ok(Self::new(
            config,
            Arc::new(provider),
            Arc::new(ProcessRunner),
            Arc::new(RcgenIssuer::default()),
            layout,
        ))
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }
}

impl fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterContext")
            .field("layout", &self.layout)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

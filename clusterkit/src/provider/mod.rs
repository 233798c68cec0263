//! Cloud provider abstraction.
//!
//! `CloudProvider` is the typed resource API the provisioner and the cluster
//! lifecycle talk to. `HetznerClient` implements it over HTTP and
//! `MockProvider` keeps resources in memory for tests.

pub mod hetzner;
pub mod mock;

use std::net::Ipv4Addr;

use async_trait::async_trait;
use hcloud_models::{
    CreateFirewallRequest, CreateNetworkRequest, CreateServerRequest, CreateSshKeyRequest,
    Datacenter, Firewall, Labels, Network, Server, ServerType, SshKey,
};

use crate::errors::{ResourceKind, Result};

pub use hetzner::HetznerClient;
pub use mock::MockProvider;

/// Label carrying the cluster prefix on every created resource
pub const CLUSTER_LABEL: &str = "cluster";

/// Identity of any provider resource, independent of its kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    pub kind: ResourceKind,
    pub id: u64,
    pub name: String,
    pub labels: Labels,
}

impl ResourceSummary {
    /// Whether this resource was created for the cluster `prefix`
    pub fn belongs_to(&self, prefix: &str) -> bool {
        match self.labels.get(CLUSTER_LABEL) {
            Some(owner) => owner == prefix,
            None => self.name.starts_with(&format!("{prefix}-")),
        }
    }
}

/// Typed resource API of the infrastructure provider
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create_ssh_key(&self, request: &CreateSshKeyRequest) -> Result<SshKey>;

    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<Network>;

    async fn create_firewall(&self, request: &CreateFirewallRequest) -> Result<Firewall>;

    async fn create_server(&self, request: &CreateServerRequest) -> Result<Server>;

    /// Fresh copy of a server record
    async fn server(&self, id: u64) -> Result<Server>;

    async fn server_by_name(&self, name: &str) -> Result<Option<Server>>;

    async fn network_by_name(&self, name: &str) -> Result<Option<Network>>;

    async fn firewall_by_name(&self, name: &str) -> Result<Option<Firewall>>;

    async fn list_servers(&self) -> Result<Vec<Server>>;

    /// All resources of one kind in the project
    async fn list_resources(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>>;

    async fn delete_resource(&self, kind: ResourceKind, id: u64) -> Result<()>;

    /// Attach a server to a private network at a fixed address
    async fn attach_to_network(&self, server_id: u64, network_id: u64, ip: Ipv4Addr) -> Result<()>;

    async fn reboot_server(&self, server_id: u64) -> Result<()>;

    async fn list_datacenters(&self) -> Result<Vec<Datacenter>>;

    async fn list_server_types(&self) -> Result<Vec<ServerType>>;
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Action, Labels, Meta};

/// Server status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Off,
    Deleting,
    Migrating,
    Rebuilding,
    #[serde(other)]
    Unknown,
}

/// Public IPv4 address of a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ipv4Address {
    pub ip: String,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub dns_ptr: Option<String>,
}

/// Public IPv6 network of a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ipv6Network {
    pub ip: String,
}

/// Public networking of a server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicNet {
    #[serde(default)]
    pub ipv4: Option<Ipv4Address>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Network>,
    #[serde(default)]
    pub firewalls: Vec<AppliedFirewall>,
}

/// Firewall applied to a server's public interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedFirewall {
    pub id: u64,
    #[serde(default)]
    pub status: Option<String>,
}

/// Attachment of a server to a private network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateNet {
    pub network: u64,
    pub ip: String,
    #[serde(default)]
    pub alias_ips: Vec<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
}

/// Minimal server type reference embedded in a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTypeRef {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub disk: u64,
}

/// Server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub status: ServerStatus,
    #[serde(default)]
    pub public_net: PublicNet,
    #[serde(default)]
    pub private_net: Vec<PrivateNet>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub server_type: Option<ServerTypeRef>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl Server {
    /// Public IPv4 address, if assigned
    pub fn public_ipv4(&self) -> Option<&str> {
        self.public_net.ipv4.as_ref().map(|ipv4| ipv4.ip.as_str())
    }

    /// Address inside the only attached private network
    pub fn private_ipv4(&self) -> Option<&str> {
        match self.private_net.as_slice() {
            [net] => Some(net.ip.as_str()),
            _ => None,
        }
    }
}

/// Firewall reference used when creating a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRef {
    pub firewall: u64,
}

/// Create server request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub server_type: String,
    pub image: String,
    pub datacenter: String,
    pub ssh_keys: Vec<String>,
    pub firewalls: Vec<FirewallRef>,
    pub labels: Labels,
    pub start_after_create: bool,
}

/// Create server response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServerResponse {
    pub server: Server,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub root_password: Option<String>,
}

/// Single server response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerResponse {
    pub server: Server,
}

/// Server list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersResponse {
    pub servers: Vec<Server>,
    #[serde(default)]
    pub meta: Meta,
}

/// Attach server to network request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachToNetworkRequest {
    pub network: u64,
    pub ip: String,
}

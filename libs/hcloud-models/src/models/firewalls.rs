use serde::{Deserialize, Serialize};

use crate::models::{Labels, Meta};

/// Rule direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    In,
    Out,
}

/// Rule protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleProtocol {
    Tcp,
    Udp,
    Icmp,
    Esp,
    Gre,
}

/// Firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub direction: RuleDirection,
    pub protocol: RuleProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default)]
    pub source_ips: Vec<String>,
    #[serde(default)]
    pub destination_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Firewall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Firewall {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<FirewallRule>,
    #[serde(default)]
    pub labels: Labels,
}

/// Create firewall request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFirewallRequest {
    pub name: String,
    pub rules: Vec<FirewallRule>,
    pub labels: Labels,
}

/// Single firewall response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallResponse {
    pub firewall: Firewall,
}

/// Firewall list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallsResponse {
    pub firewalls: Vec<Firewall>,
    #[serde(default)]
    pub meta: Meta,
}

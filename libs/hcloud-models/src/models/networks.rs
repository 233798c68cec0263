use serde::{Deserialize, Serialize};

use crate::models::{Labels, Meta};

/// Network subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    #[serde(rename = "type")]
    pub kind: String,
    pub ip_range: String,
    pub network_zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// Private network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: u64,
    pub name: String,
    pub ip_range: String,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub servers: Vec<u64>,
    #[serde(default)]
    pub labels: Labels,
}

/// Create network request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNetworkRequest {
    pub name: String,
    pub ip_range: String,
    pub subnets: Vec<Subnet>,
    pub labels: Labels,
}

/// Single network response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub network: Network,
}

/// Network list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworksResponse {
    pub networks: Vec<Network>,
    #[serde(default)]
    pub meta: Meta,
}

use serde::{Deserialize, Serialize};

use crate::models::Meta;

/// Physical location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub country: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub network_zone: String,
}

/// Server types offered by a datacenter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatacenterServerTypes {
    #[serde(default)]
    pub supported: Vec<u64>,
    #[serde(default)]
    pub available: Vec<u64>,
    #[serde(default)]
    pub available_for_migration: Vec<u64>,
}

/// Datacenter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datacenter {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub location: Location,
    #[serde(default)]
    pub server_types: DatacenterServerTypes,
}

/// Datacenter list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacentersResponse {
    pub datacenters: Vec<Datacenter>,
    #[serde(default)]
    pub meta: Meta,
}

/// Net and gross amount of a price, as decimal strings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceAmount {
    pub net: String,
    pub gross: String,
}

/// Price of a server type in one location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTypePrice {
    pub location: String,
    pub price_hourly: PriceAmount,
    pub price_monthly: PriceAmount,
}

/// Server type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerType {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub cores: u32,
    pub memory: f64,
    pub disk: u64,
    #[serde(default)]
    pub deprecated: Option<bool>,
    #[serde(default)]
    pub prices: Vec<ServerTypePrice>,
    pub storage_type: String,
    pub cpu_type: String,
    #[serde(default)]
    pub architecture: Option<String>,
}

/// Server type list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTypesResponse {
    pub server_types: Vec<ServerType>,
    #[serde(default)]
    pub meta: Meta,
}

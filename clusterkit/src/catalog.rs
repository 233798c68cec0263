//! Datacenter and server type listings

use std::cmp::Ordering;

use serde::Serialize;

use crate::errors::{ClusterError, Result};
use crate::provider::CloudProvider;

/// One datacenter with its location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatacenterEntry {
    pub name: String,
    pub city: String,
    pub country: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub network_zone: String,
    pub location_name: String,
    pub location_description: String,
}

impl DatacenterEntry {
    pub const COLUMNS: [&'static str; 9] = [
        "name",
        "city",
        "country",
        "description",
        "latitude",
        "longitude",
        "network_zone",
        "location_name",
        "location_description",
    ];

    pub fn cells(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.city.clone(),
            self.country.clone(),
            self.description.clone(),
            self.latitude.to_string(),
            self.longitude.to_string(),
            self.network_zone.clone(),
            self.location_name.clone(),
            self.location_description.clone(),
        ]
    }
}

/// One server type with its price in a given location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerTypeEntry {
    pub name: String,
    pub description: String,
    pub cores: u32,
    pub cpu_type: String,
    pub memory: f64,
    pub disk: u64,
    pub storage_type: String,
    pub price_hourly_net: String,
    pub price_hourly_gross: String,
    pub price_monthly_net: String,
    pub price_monthly_gross: String,
    pub deprecated: bool,
}

impl ServerTypeEntry {
    pub const COLUMNS: [&'static str; 11] = [
        "name",
        "cores",
        "cpu_type",
        "memory",
        "disk",
        "storage_type",
        "price_hourly_net",
        "price_hourly_gross",
        "price_monthly_net",
        "price_monthly_gross",
        "deprecated",
    ];

    pub fn cells(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.cores.to_string(),
            self.cpu_type.clone(),
            self.memory.to_string(),
            self.disk.to_string(),
            self.storage_type.clone(),
            self.price_hourly_net.clone(),
            self.price_hourly_gross.clone(),
            self.price_monthly_net.clone(),
            self.price_monthly_gross.clone(),
            self.deprecated.to_string(),
        ]
    }

    fn order(&self, other: &Self) -> Ordering {
        self.cpu_type
            .cmp(&other.cpu_type)
            .then(self.cores.cmp(&other.cores))
    }
}

/// All datacenters of the provider
pub async fn datacenters(provider: &dyn CloudProvider) -> Result<Vec<DatacenterEntry>> {
    Ok(provider
        .list_datacenters()
        .await?
        .into_iter()
        .map(|dc| DatacenterEntry {
            name: dc.name,
            city: dc.location.city,
            country: dc.location.country,
            description: dc.description,
            latitude: dc.location.latitude,
            longitude: dc.location.longitude,
            network_zone: dc.location.network_zone,
            location_name: dc.location.name,
            location_description: dc.location.description,
        })
        .collect())
}

/// Server types priced in the location of `datacenter`, by CPU type then core count
pub async fn server_types(provider: &dyn CloudProvider, datacenter: &str) -> Result<Vec<ServerTypeEntry>> {
    let datacenters = provider.list_datacenters().await?;
    let dc = datacenters
        .iter()
        .find(|dc| dc.name == datacenter)
        .ok_or_else(|| ClusterError::ConfigError(format!("unknown datacenter: {datacenter}")))?;
    let location = dc.location.name.as_str();

    let mut entries: Vec<ServerTypeEntry> = provider
        .list_server_types()
        .await?
        .into_iter()
        .filter_map(|server_type| {
            let price = server_type.prices.iter().find(|p| p.location == location)?.clone();
            Some(ServerTypeEntry {
                name: server_type.name,
                description: server_type.description,
                cores: server_type.cores,
                cpu_type: server_type.cpu_type,
                memory: server_type.memory,
                disk: server_type.disk,
                storage_type: server_type.storage_type,
                price_hourly_net: price.price_hourly.net,
                price_hourly_gross: price.price_hourly.gross,
                price_monthly_net: price.price_monthly.net,
                price_monthly_gross: price.price_monthly.gross,
                deprecated: server_type.deprecated.unwrap_or(false),
            })
        })
        .collect();

    entries.sort_by(ServerTypeEntry::order);
    Ok(entries)
}

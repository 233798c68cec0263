//! In-memory provider used by tests

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use hcloud_models::{
    CreateFirewallRequest, CreateNetworkRequest, CreateServerRequest, CreateSshKeyRequest,
    Datacenter, Firewall, Ipv4Address, Network, PrivateNet, PublicNet, Server, ServerStatus,
    ServerType, SshKey,
};

use crate::errors::{ClusterError, ResourceKind, Result};
use crate::provider::{CloudProvider, ResourceSummary};

#[derive(Default)]
struct State {
    next_id: u64,
    servers: Vec<(Server, u32)>,
    networks: Vec<Network>,
    firewalls: Vec<Firewall>,
    ssh_keys: Vec<SshKey>,
    datacenters: Vec<Datacenter>,
    server_types: Vec<ServerType>,
    failing_servers: HashSet<String>,
    deleted: Vec<(ResourceKind, String)>,
    rebooted: Vec<String>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn server_mut(&mut self, id: u64) -> Result<&mut (Server, u32)> {
        self.servers
            .iter_mut()
            .find(|(server, _)| server.id == id)
            .ok_or_else(|| ClusterError::not_found(ResourceKind::Server, id.to_string()))
    }
}

/// Provider keeping every resource in memory.
///
/// Servers report `running` after a configurable number of status reads.
pub struct MockProvider {
    state: Mutex<State>,
    reads_until_running: u32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            reads_until_running: 1,
        }
    }

    /// Servers stay `initializing` for this many reads
    pub fn with_reads_until_running(mut self, reads: u32) -> Self {
        self.reads_until_running = reads;
        self
    }

    pub fn with_catalog(self, datacenters: Vec<Datacenter>, server_types: Vec<ServerType>) -> Self {
        {
            let mut state = self.lock();
            state.datacenters = datacenters;
            state.server_types = server_types;
        }
        self
    }

    /// Make creating the server `name` fail
    pub fn fail_server(&self, name: &str) {
        self.lock().failing_servers.insert(name.to_string());
    }

    /// Insert an already running server
    pub fn insert_server(&self, server: Server) {
        self.lock().servers.push((server, u32::MAX));
    }

    pub fn insert_network(&self, network: Network) {
        self.lock().networks.push(network);
    }

    pub fn insert_firewall(&self, firewall: Firewall) {
        self.lock().firewalls.push(firewall);
    }

    pub fn insert_ssh_key(&self, key: SshKey) {
        self.lock().ssh_keys.push(key);
    }

    pub fn servers(&self) -> Vec<Server> {
        self.lock().servers.iter().map(|(server, _)| server.clone()).collect()
    }

    pub fn networks(&self) -> Vec<Network> {
        self.lock().networks.clone()
    }

    pub fn firewalls(&self) -> Vec<Firewall> {
        self.lock().firewalls.clone()
    }

    pub fn ssh_keys(&self) -> Vec<SshKey> {
        self.lock().ssh_keys.clone()
    }

    /// Deleted resources, in deletion order
    pub fn deleted(&self) -> Vec<(ResourceKind, String)> {
        self.lock().deleted.clone()
    }

    /// Names of rebooted servers
    pub fn rebooted(&self) -> Vec<String> {
        self.lock().rebooted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn create_ssh_key(&self, request: &CreateSshKeyRequest) -> Result<SshKey> {
        let mut state = self.lock();
        let key = SshKey {
            id: state.next_id(),
            name: request.name.clone(),
            public_key: request.public_key.clone(),
            fingerprint: None,
            labels: request.labels.clone(),
        };
        state.ssh_keys.push(key.clone());
        Ok(key)
    }

    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<Network> {
        let mut state = self.lock();
        let network = Network {
            id: state.next_id(),
            name: request.name.clone(),
            ip_range: request.ip_range.clone(),
            subnets: request.subnets.clone(),
            servers: Vec::new(),
            labels: request.labels.clone(),
        };
        state.networks.push(network.clone());
        Ok(network)
    }

    async fn create_firewall(&self, request: &CreateFirewallRequest) -> Result<Firewall> {
        let mut state = self.lock();
        let firewall = Firewall {
            id: state.next_id(),
            name: request.name.clone(),
            rules: request.rules.clone(),
            labels: request.labels.clone(),
        };
        state.firewalls.push(firewall.clone());
        Ok(firewall)
    }

    async fn create_server(&self, request: &CreateServerRequest) -> Result<Server> {
        let mut state = self.lock();
        if state.failing_servers.contains(&request.name) {
            return Err(ClusterError::ProviderError {
                status: 422,
                message: format!("server {} could not be created", request.name),
            });
        }
        let id = state.next_id();
        let server = Server {
            id,
            name: request.name.clone(),
            status: ServerStatus::Initializing,
            public_net: PublicNet {
                ipv4: Some(Ipv4Address {
                    ip: format!("203.0.113.{}", id % 250 + 1),
                    blocked: false,
                    dns_ptr: None,
                }),
                ipv6: None,
                firewalls: Vec::new(),
            },
            private_net: Vec::new(),
            labels: request.labels.clone(),
            server_type: None,
            created: None,
        };
        state.servers.push((server.clone(), 0));
        Ok(server)
    }

    async fn server(&self, id: u64) -> Result<Server> {
        let reads_until_running = self.reads_until_running;
        let mut state = self.lock();
        let (server, reads) = state.server_mut(id)?;
        *reads = reads.saturating_add(1);
        if *reads >= reads_until_running {
            server.status = ServerStatus::Running;
        }
        Ok(server.clone())
    }

    async fn server_by_name(&self, name: &str) -> Result<Option<Server>> {
        Ok(self
            .lock()
            .servers
            .iter()
            .find(|(server, _)| server.name == name)
            .map(|(server, _)| server.clone()))
    }

    async fn network_by_name(&self, name: &str) -> Result<Option<Network>> {
        Ok(self.lock().networks.iter().find(|n| n.name == name).cloned())
    }

    async fn firewall_by_name(&self, name: &str) -> Result<Option<Firewall>> {
        Ok(self.lock().firewalls.iter().find(|f| f.name == name).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        Ok(self.servers())
    }

    async fn list_resources(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>> {
        let state = self.lock();
        let summaries = match kind {
            ResourceKind::Server => state
                .servers
                .iter()
                .map(|(s, _)| (s.id, s.name.clone(), s.labels.clone()))
                .collect::<Vec<_>>(),
            ResourceKind::Network => state
                .networks
                .iter()
                .map(|n| (n.id, n.name.clone(), n.labels.clone()))
                .collect(),
            ResourceKind::Firewall => state
                .firewalls
                .iter()
                .map(|f| (f.id, f.name.clone(), f.labels.clone()))
                .collect(),
            ResourceKind::SshKey => state
                .ssh_keys
                .iter()
                .map(|k| (k.id, k.name.clone(), k.labels.clone()))
                .collect(),
        };
        Ok(summaries
            .into_iter()
            .map(|(id, name, labels)| ResourceSummary {
                kind,
                id,
                name,
                labels,
            })
            .collect())
    }

    async fn delete_resource(&self, kind: ResourceKind, id: u64) -> Result<()> {
        let mut state = self.lock();
        let name = match kind {
            ResourceKind::Server => remove_by(&mut state.servers, |(s, _)| s.id == id).map(|(s, _)| s.name),
            ResourceKind::Network => remove_by(&mut state.networks, |n| n.id == id).map(|n| n.name),
            ResourceKind::Firewall => remove_by(&mut state.firewalls, |f| f.id == id).map(|f| f.name),
            ResourceKind::SshKey => remove_by(&mut state.ssh_keys, |k| k.id == id).map(|k| k.name),
        }
        .ok_or_else(|| ClusterError::not_found(kind, id.to_string()))?;
        state.deleted.push((kind, name));
        Ok(())
    }

    async fn attach_to_network(&self, server_id: u64, network_id: u64, ip: Ipv4Addr) -> Result<()> {
        let mut state = self.lock();
        if !state.networks.iter().any(|n| n.id == network_id) {
            return Err(ClusterError::not_found(ResourceKind::Network, network_id.to_string()));
        }
        let (server, _) = state.server_mut(server_id)?;
        server.private_net.push(PrivateNet {
            network: network_id,
            ip: ip.to_string(),
            alias_ips: Vec::new(),
            mac_address: None,
        });
        if let Some(network) = state.networks.iter_mut().find(|n| n.id == network_id) {
            network.servers.push(server_id);
        }
        Ok(())
    }

    async fn reboot_server(&self, server_id: u64) -> Result<()> {
        let mut state = self.lock();
        let name = state.server_mut(server_id)?.0.name.clone();
        state.rebooted.push(name);
        Ok(())
    }

    async fn list_datacenters(&self) -> Result<Vec<Datacenter>> {
        Ok(self.lock().datacenters.clone())
    }

    async fn list_server_types(&self) -> Result<Vec<ServerType>> {
        Ok(self.lock().server_types.clone())
    }
}

fn remove_by<T>(items: &mut Vec<T>, predicate: impl Fn(&T) -> bool) -> Option<T> {
    let index = items.iter().position(predicate)?;
    Some(items.remove(index))
}

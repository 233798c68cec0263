//! Lifecycle of a whole cluster: create, attach, destroy and nuke

pub mod config;
pub mod ports;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use hcloud_models::{Firewall, Network};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::context::ClusterContext;
use crate::errors::{ClusterError, ResourceKind, Result};
use crate::node::role::{self, NodeRole};
use crate::node::Node;
use crate::provider::ResourceSummary;
use crate::provision::credentials::CredentialLayout;
use crate::provision::Provisioner;

use ports::RuntimePorts;

/// What a deletion pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NukeReport {
    /// Deleted resources as `(kind, name)`
    pub deleted: Vec<(ResourceKind, String)>,

    /// Resources labeled for the cluster whose name does not match it
    pub skipped: Vec<(ResourceKind, String)>,

    /// Resources that could not be deleted, with the reason
    pub failed: Vec<(ResourceKind, String, String)>,

    /// Local credential files that were removed
    pub removed_files: Vec<PathBuf>,
}

impl NukeReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Everything a runtime client needs to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientDescriptor {
    /// `tls://<coordinator public address>:<ipc port>`
    pub address: String,
    pub dashboard: String,
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl fmt::Display for ClientDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "address:   {}", self.address)?;
        writeln!(f, "dashboard: {}", self.dashboard)?;
        writeln!(f, "ca:        {}", self.ca_cert.display())?;
        writeln!(f, "cert:      {}", self.client_cert.display())?;
        write!(f, "key:       {}", self.client_key.display())
    }
}

/// One coordinator plus workers, with their network and firewall
#[derive(Debug)]
pub struct Cluster {
    ctx: ClusterContext,
    coordinator: Option<Node>,
    workers: Vec<Node>,
    network: Option<Network>,
    firewall: Option<Firewall>,
    ports: RuntimePorts,
    span: Span,
}

impl Cluster {
    pub(crate) fn from_parts(
        ctx: ClusterContext,
        coordinator: Node,
        workers: Vec<Node>,
        network: Network,
        firewall: Firewall,
        ports: RuntimePorts,
    ) -> Self {
        let span = info_span!("cluster", prefix = %ctx.prefix());
        Self {
            ctx,
            coordinator: Some(coordinator),
            workers,
            network: Some(network),
            firewall: Some(firewall),
            ports,
            span,
        }
    }

    /// Provision a new cluster as described by the context's configuration
    pub async fn create(ctx: ClusterContext) -> Result<Self> {
        ctx.config.validate()?;
        Provisioner::new(ctx).provision().await
    }

    /// Attach to the running cluster of the context's prefix
    pub async fn attach(ctx: ClusterContext) -> Result<Self> {
        let span = info_span!("cluster", prefix = %ctx.prefix());
        async move {
            let prefix = ctx.prefix().to_string();
            let key_file = ctx.layout.private_key().path().to_path_buf();
            info!("Attaching to cluster ...");

            let coordinator_name = role::node_name(&prefix, NodeRole::Coordinator);
            let coordinator = ctx
                .provider
                .server_by_name(&coordinator_name)
                .await?
                .ok_or_else(|| ClusterError::not_found(ResourceKind::Server, coordinator_name))?;
            let ports = RuntimePorts::from_labels(&coordinator.labels)?;
            let coordinator = Node::from_server(&prefix, coordinator, &key_file)?;

            let worker_prefix = format!("{}{}", role::node_name_prefix(&prefix), role::WORKER_SUFFIX);
            let mut workers = ctx
                .provider
                .list_servers()
                .await?
                .into_iter()
                .filter(|server| server.name.starts_with(&worker_prefix))
                .map(|server| Node::from_server(&prefix, server, &key_file))
                .collect::<Result<Vec<_>>>()?;
            if workers.is_empty() {
                return Err(ClusterError::not_found(
                    ResourceKind::Server,
                    format!("no workers named {worker_prefix}###"),
                ));
            }
            workers.sort_by_key(Node::role);

            let firewall_name = role::firewall_name(&prefix);
            let firewall = ctx
                .provider
                .firewall_by_name(&firewall_name)
                .await?
                .ok_or_else(|| ClusterError::not_found(ResourceKind::Firewall, firewall_name))?;

            let network_name = role::network_name(&prefix);
            let network = ctx
                .provider
                .network_by_name(&network_name)
                .await?
                .ok_or_else(|| ClusterError::not_found(ResourceKind::Network, network_name))?;

            info!("Successfully attached to cluster with {} worker(s)", workers.len());
            Ok::<_, ClusterError>(Self::from_parts(ctx, coordinator, workers, network, firewall, ports))
        }
        .instrument(span)
        .await
    }

    pub fn prefix(&self) -> &str {
        self.ctx.prefix()
    }

    /// A cluster is alive until it has been destroyed
    pub fn alive(&self) -> bool {
        self.coordinator.is_some()
    }

    pub fn coordinator(&self) -> Option<&Node> {
        self.coordinator.as_ref()
    }

    pub fn workers(&self) -> &[Node] {
        &self.workers
    }

    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    pub fn firewall(&self) -> Option<&Firewall> {
        self.firewall.as_ref()
    }

    pub fn ports(&self) -> RuntimePorts {
        self.ports
    }

    fn require_alive(&self) -> Result<&Node> {
        self.coordinator
            .as_ref()
            .ok_or_else(|| ClusterError::invariant(format!("cluster {} is not alive", self.prefix())))
    }

    /// Nodes keyed by their name suffix, `scheduler` and `worker###`
    pub fn nodes_by_suffix(&self) -> BTreeMap<String, &Node> {
        self.coordinator
            .iter()
            .chain(self.workers.iter())
            .map(|node| (node.role().suffix(), node))
            .collect()
    }

    /// Connection details for a runtime client
    pub fn client_descriptor(&self) -> Result<ClientDescriptor> {
        let coordinator = self.require_alive()?;
        let public_ip = coordinator.public_ip()?;
        let layout = &self.ctx.layout;
        Ok(ClientDescriptor {
            address: format!("tls://{}:{}", public_ip, self.ports.ipc),
            dashboard: format!("http://{}:{}/status", public_ip, self.ports.dash),
            ca_cert: layout.ca_cert().path().to_path_buf(),
            client_cert: layout.node_cert().path().to_path_buf(),
            client_key: layout.node_key().path().to_path_buf(),
        })
    }

    /// Delete every resource and local file of this cluster
    pub async fn destroy(&mut self) -> Result<NukeReport> {
        self.require_alive()?;
        let span = self.span.clone();
        let report = async {
            info!("Destroying cluster ...");
            let report = delete_resources(&self.ctx, false).await?;
            info!("Successfully destroyed cluster");
            Ok::<_, ClusterError>(report)
        }
        .instrument(span)
        .await?;

        self.coordinator = None;
        self.workers.clear();
        self.network = None;
        self.firewall = None;
        Ok(report)
    }

    /// Best-effort removal of everything belonging to the context's prefix,
    /// without attaching first
    pub async fn nuke(ctx: &ClusterContext) -> Result<NukeReport> {
        let span = info_span!("cluster", prefix = %ctx.prefix());
        async {
            info!("Nuking cluster ...");
            let report = delete_resources(ctx, true).await?;
            if report.is_clean() {
                info!("Successfully nuked cluster");
            } else {
                warn!("Nuke left {} resource(s) behind", report.failed.len());
            }
            Ok::<_, ClusterError>(report)
        }
        .instrument(span)
        .await
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Cluster prefix=\"{}\" alive={} workers={} ipc={} dash={} nanny={}>",
            self.prefix(),
            self.alive(),
            self.workers.len(),
            self.ports.ipc,
            self.ports.dash,
            self.ports.nanny
        )
    }
}

/// Remove every provider resource of `ctx.prefix()`, servers first, then the
/// local credential files.
///
/// Strict mode stops at the first failure; best-effort mode records it and continues.
async fn delete_resources(ctx: &ClusterContext, best_effort: bool) -> Result<NukeReport> {
    let prefix = ctx.prefix();
    let name_prefix = format!("{prefix}-");
    let mut report = NukeReport::default();

    for kind in ResourceKind::DELETION_ORDER {
        let resources = match ctx.provider.list_resources(kind).await {
            Ok(resources) => resources,
            Err(e) if best_effort => {
                error!("Unable to list {} resources: {}", kind, e);
                report.failed.push((kind, String::from("*"), e.to_string()));
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut deleted_ids = HashSet::new();
        for resource in resources.into_iter().filter(|r| r.belongs_to(prefix)) {
            if !resource.name.starts_with(&name_prefix) {
                warn!("Not deleting {} {}: name does not match the cluster", kind, resource.name);
                report.skipped.push((kind, resource.name));
                continue;
            }
            info!("Deleting {} {} ...", kind, resource.name);
            match ctx.provider.delete_resource(kind, resource.id).await {
                Ok(()) => {
                    deleted_ids.insert(resource.id);
                    report.deleted.push((kind, resource.name));
                }
                Err(e) if best_effort => {
                    error!("Failed to delete {} {}: {}", kind, resource.name, e);
                    report.failed.push((kind, resource.name, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        if kind == ResourceKind::Server && !deleted_ids.is_empty() {
            match wait_until_gone(ctx, &deleted_ids).await {
                Ok(()) => {}
                Err(e) if best_effort => {
                    error!("Servers did not disappear: {}", e);
                    report.failed.push((kind, String::from("*"), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
    }

    report.removed_files = remove_local_files(&ctx.layout, best_effort).await?;
    Ok(report)
}

async fn wait_until_gone(ctx: &ClusterContext, ids: &HashSet<u64>) -> Result<()> {
    ctx.config
        .server_poll()
        .poll("server deletion", |_| async {
            let remaining: Vec<ResourceSummary> = ctx.provider.list_resources(ResourceKind::Server).await?;
            Ok::<_, ClusterError>(!remaining.iter().any(|server| ids.contains(&server.id)))
        })
        .await?;
    Ok(())
}

async fn remove_local_files(layout: &CredentialLayout, best_effort: bool) -> Result<Vec<PathBuf>> {
    match layout.remove_all().await {
        Ok(removed) => Ok(removed),
        Err(e) if best_effort => {
            error!("Failed to remove local credential files: {}", e);
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

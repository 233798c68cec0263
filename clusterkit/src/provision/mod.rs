//! Concurrent creation of a cluster's resources and nodes
//!
//! Prerequisites (identity key, network, firewall) are created first, then
//! every node is created and bootstrapped concurrently. The coordinator
//! starts its runtime as soon as it is bootstrapped; workers receive its
//! private address through a watch channel before starting theirs.

pub mod credentials;
pub mod tls;

use std::net::Ipv4Addr;

use futures::future::join_all;
use hcloud_models::{
    CreateFirewallRequest, CreateNetworkRequest, CreateServerRequest, CreateSshKeyRequest,
    Firewall, FirewallRef, FirewallRule, Labels, Network, RuleDirection, RuleProtocol, SshKey,
    Subnet,
};
use tokio::sync::watch;
use tracing::{error, info, info_span, Instrument};

use crate::cluster::Cluster;
use crate::command::process::RunOptions;
use crate::command::spec::CommandSpec;
use crate::context::ClusterContext;
use crate::errors::{ClusterError, Result};
use crate::node::role::{self, NodeRole, NETWORK_RANGE};
use crate::node::Node;
use crate::provider::CLUSTER_LABEL;

use credentials::CredentialLayout;

pub const ROLE_LABEL: &str = "role";

const ANY_IPV4: &str = "0.0.0.0/0";
const ANY_IPV6: &str = "::/0";

/// Private address of the coordinator once its runtime is up
type CoordinatorSignal = watch::Receiver<Option<Ipv4Addr>>;

/// Creates every resource of a new cluster
#[derive(Debug, Clone)]
pub struct Provisioner {
    ctx: ClusterContext,
}

impl Provisioner {
    pub fn new(ctx: ClusterContext) -> Self {
        Self { ctx }
    }

    fn labels(&self) -> Labels {
        Labels::from([(CLUSTER_LABEL.to_string(), self.ctx.prefix().to_string())])
    }

    /// Generate the ssh key pair and TLS material locally, then upload the public key
    pub async fn create_identity(&self) -> Result<SshKey> {
        let layout = &self.ctx.layout;
        let prefix = self.ctx.prefix();
        CredentialLayout::ensure_absent(&layout.all_files()).await?;

        info!("Creating ssh key ...");
        let private_key = layout.private_key().path().to_string_lossy().into_owned();
        let key_comment = role::key_name(prefix);
        let keygen = CommandSpec::from_args([
            "ssh-keygen",
            "-q",
            "-f",
            private_key.as_str(),
            "-P",
            "",
            "-t",
            "rsa",
            "-b",
            "4096",
            "-C",
            key_comment.as_str(),
        ])?;
        self.ctx
            .runner
            .run_strict(&keygen, &RunOptions::default().detached_stdin())
            .await?;

        info!("Creating TLS certificates ...");
        self.ctx.issuer.issue(prefix)?.write(layout).await?;

        info!("Uploading ssh key ...");
        let public_key = layout.public_key().read_string().await?;
        self.ctx
            .provider
            .create_ssh_key(&CreateSshKeyRequest {
                name: role::key_name(prefix),
                public_key: public_key.trim().to_string(),
                labels: self.labels(),
            })
            .await
    }

    pub async fn create_network(&self) -> Result<Network> {
        info!("Creating network ...");
        self.ctx
            .provider
            .create_network(&CreateNetworkRequest {
                name: role::network_name(self.ctx.prefix()),
                ip_range: NETWORK_RANGE.to_string(),
                subnets: vec![Subnet {
                    kind: "cloud".to_string(),
                    ip_range: NETWORK_RANGE.to_string(),
                    network_zone: self.ctx.config.network_zone.clone(),
                    gateway: None,
                }],
                labels: self.labels(),
            })
            .await
    }

    pub async fn create_firewall(&self) -> Result<Firewall> {
        info!("Creating firewall ...");
        let ports = self.ctx.config.ports;
        let mut rules = vec![
            inbound(RuleProtocol::Tcp, Some(22), "ssh"),
            inbound(RuleProtocol::Icmp, None, "ping"),
        ];
        rules.extend([
            inbound(RuleProtocol::Tcp, Some(ports.ipc), "dask ipc"),
            inbound(RuleProtocol::Tcp, Some(ports.dash), "dask dashboard"),
            inbound(RuleProtocol::Tcp, Some(ports.nanny), "dask nanny"),
        ]);
        self.ctx
            .provider
            .create_firewall(&CreateFirewallRequest {
                name: role::firewall_name(self.ctx.prefix()),
                rules,
                labels: self.labels(),
            })
            .await
    }

    /// Creation request of the server for `role`
    pub fn server_request(&self, role: NodeRole, key: &SshKey, firewall: &Firewall) -> CreateServerRequest {
        let config = &self.ctx.config;
        let mut labels = self.labels();
        let server_type = match role {
            NodeRole::Coordinator => {
                labels.insert(ROLE_LABEL.to_string(), "coordinator".to_string());
                labels.extend(config.ports.labels());
                config.scheduler_type.clone()
            }
            NodeRole::Worker(_) => {
                labels.insert(ROLE_LABEL.to_string(), "worker".to_string());
                config.worker_type.clone()
            }
        };
        CreateServerRequest {
            name: role::node_name(self.ctx.prefix(), role),
            server_type,
            image: config.image.clone(),
            datacenter: config.datacenter.clone(),
            ssh_keys: vec![key.name.clone()],
            firewalls: vec![FirewallRef { firewall: firewall.id }],
            labels,
            start_after_create: true,
        }
    }

    /// Create and bootstrap one node, then start its role
    async fn node_task(
        &self,
        role: NodeRole,
        request: CreateServerRequest,
        network_id: u64,
        coordinator: CoordinatorSignal,
        started: Option<watch::Sender<Option<Ipv4Addr>>>,
    ) -> Result<Node> {
        let ports = self.ctx.config.ports;
        let mut node = Node::create(&self.ctx, &request, network_id).await?;
        node.bootstrap(&self.ctx).await?;

        match role {
            NodeRole::Coordinator => {
                node.start_role(&self.ctx, ports, None).await?;
                if let Some(started) = started {
                    started.send_replace(Some(node.private_ip()?));
                }
            }
            NodeRole::Worker(_) => {
                let coordinator_ip = wait_for_coordinator(coordinator).await?;
                node.start_role(&self.ctx, ports, Some(coordinator_ip)).await?;
            }
        }
        Ok(node)
    }

    /// Create every node; failures of one node never cancel the others.
    ///
    /// Returns the coordinator and the workers in index order, or the first
    /// failure (coordinator first, then workers by index) once all tasks settled.
    pub async fn create_nodes(
        &self,
        key: &SshKey,
        network: &Network,
        firewall: &Firewall,
    ) -> Result<(Node, Vec<Node>)> {
        let (started, coordinator_ip) = watch::channel(None);

        let coordinator_task = {
            let request = self.server_request(NodeRole::Coordinator, key, firewall);
            let span = info_span!("provision", node = %request.name);
            self.node_task(NodeRole::Coordinator, request, network.id, coordinator_ip.clone(), Some(started))
                .instrument(span)
        };
        let worker_tasks = (0..self.ctx.config.workers).map(|index| {
            let role = NodeRole::Worker(index);
            let request = self.server_request(role, key, firewall);
            let span = info_span!("provision", node = %request.name);
            self.node_task(role, request, network.id, coordinator_ip.clone(), None)
                .instrument(span)
        });

        let (coordinator, workers) = tokio::join!(coordinator_task, join_all(worker_tasks));

        let mut first_error = None;
        let coordinator = match coordinator {
            Ok(node) => Some(node),
            Err(e) => {
                error!("Coordinator failed: {}", e);
                first_error.get_or_insert(e);
                None
            }
        };
        let mut nodes = Vec::with_capacity(workers.len());
        for (index, result) in workers.into_iter().enumerate() {
            match result {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    error!("Worker {} failed: {}", index, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match (coordinator, first_error) {
            (Some(coordinator), None) => Ok((coordinator, nodes)),
            (_, Some(e)) => Err(e),
            (None, None) => Err(ClusterError::Internal("coordinator task vanished".to_string())),
        }
    }

    /// Create the whole cluster
    pub async fn provision(self) -> Result<Cluster> {
        let span = info_span!("cluster", prefix = %self.ctx.prefix());
        async {
            info!("Creating cluster ...");
            CredentialLayout::ensure_absent(&self.ctx.layout.all_files()).await?;
            let created = async {
                let (key, network, firewall) =
                    tokio::try_join!(self.create_identity(), self.create_network(), self.create_firewall())?;
                let (coordinator, workers) = self.create_nodes(&key, &network, &firewall).await?;
                Ok::<_, ClusterError>((coordinator, workers, network, firewall))
            }
            .await;
            let (coordinator, workers, network, firewall) =
                created.map_err(|err| ClusterError::incomplete(self.ctx.prefix(), err))?;
            info!("Successfully created cluster");
            Ok::<_, ClusterError>(Cluster::from_parts(
                self.ctx.clone(),
                coordinator,
                workers,
                network,
                firewall,
                self.ctx.config.ports,
            ))
        }
        .instrument(span)
        .await
    }
}

fn inbound(protocol: RuleProtocol, port: Option<u16>, description: &str) -> FirewallRule {
    FirewallRule {
        direction: RuleDirection::In,
        protocol,
        port: port.map(|port| port.to_string()),
        source_ips: vec![ANY_IPV4.to_string(), ANY_IPV6.to_string()],
        destination_ips: Vec::new(),
        description: Some(description.to_string()),
    }
}

async fn wait_for_coordinator(mut coordinator: CoordinatorSignal) -> Result<Ipv4Addr> {
    let ip = coordinator
        .wait_for(Option::is_some)
        .await
        .map_err(|_| ClusterError::invariant("coordinator failed before its runtime started"))?;
    (*ip).ok_or_else(|| ClusterError::Internal("coordinator address missing".to_string()))
}

//! One provisioned machine of a cluster

pub mod fsm;
pub mod role;

use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use hcloud_models::{CreateServerRequest, Labels, Server, ServerStatus};
use tracing::{debug, info, info_span, Instrument, Span};

use crate::cluster::ports::RuntimePorts;
use crate::command::process::RunOptions;
use crate::command::remote::RemoteEndpoint;
use crate::command::spec::CommandSpec;
use crate::context::ClusterContext;
use crate::errors::{ClusterError, Result};

pub use fsm::{BootstrapEvent, BootstrapFsm, BootstrapState, ShellUser};
pub use role::NodeRole;

/// Scripts copied to `~/` as root before the reboot
pub const ROOT_STAGE_FILES: [&str; 3] = ["bootstrap_01.sh", "bootstrap_02.sh", "sshd_config.patch"];

/// Scripts copied to `~/` of the cluster account
pub const USER_STAGE_FILES: [&str; 5] = [
    "bootstrap_03.sh",
    "bootstrap_scheduler.sh",
    "bootstrap_worker.sh",
    "requirements_conda.txt",
    "requirements_pypi.txt",
];

/// Prints the id the kernel drew for the current boot
pub const BOOT_ID_COMMAND: [&str; 2] = ["cat", "/proc/sys/kernel/random/boot_id"];

const ROOT: &str = "root";

/// A server of the cluster and its bootstrap progress
#[derive(Debug)]
pub struct Node {
    role: NodeRole,
    prefix: String,
    server: Server,
    key_file: PathBuf,
    fsm: BootstrapFsm,
    span: Span,
}

impl Node {
    fn with_fsm(prefix: &str, server: Server, key_file: &Path, fsm: BootstrapFsm) -> Result<Self> {
        let role = NodeRole::from_server_name(prefix, &server.name)?;
        let span = info_span!("node", name = %server.name);
        Ok(Self {
            role,
            prefix: prefix.to_string(),
            server,
            key_file: key_file.to_path_buf(),
            fsm,
            span,
        })
    }

    /// Wrap a server of a running cluster
    pub fn from_server(prefix: &str, server: Server, key_file: &Path) -> Result<Self> {
        let role = NodeRole::from_server_name(prefix, &server.name)?;
        Self::with_fsm(prefix, server, key_file, BootstrapFsm::attached(role))
    }

    /// Create the server, wait until it runs and attach it to `network_id`
    /// at the address of its role
    pub async fn create(ctx: &ClusterContext, request: &CreateServerRequest, network_id: u64) -> Result<Self> {
        let server = ctx.provider.create_server(request).await?;
        let mut node = Self::with_fsm(ctx.prefix(), server, ctx.layout.private_key().path(), BootstrapFsm::new())?;
        let span = node.span.clone();
        async {
            info!("Server created, waiting for it to run ...");
            let id = node.server.id;
            ctx.config
                .server_poll()
                .poll(&format!("server {}", node.name()), |_| async move {
                    Ok::<_, ClusterError>(ctx.provider.server(id).await?.status == ServerStatus::Running)
                })
                .await?;

            let ip = node.role.private_ip()?;
            info!("Attaching to network at {} ...", ip);
            ctx.provider.attach_to_network(id, network_id, ip).await?;
            node.refresh(ctx).await?;
            node.fsm.process(BootstrapEvent::AttachNetwork)?;
            Ok::<_, ClusterError>(node)
        }
        .instrument(span)
        .await
    }

    pub fn name(&self) -> &str {
        &self.server.name
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn labels(&self) -> &Labels {
        &self.server.labels
    }

    pub fn state(&self) -> BootstrapState {
        self.fsm.state()
    }

    pub fn public_ip(&self) -> Result<Ipv4Addr> {
        let ip = self
            .server
            .public_ipv4()
            .ok_or_else(|| ClusterError::invariant(format!("{} has no public address", self.name())))?;
        parse_ip(self.name(), ip)
    }

    pub fn private_ip(&self) -> Result<Ipv4Addr> {
        let ip = self.server.private_ipv4().ok_or_else(|| {
            ClusterError::invariant(format!("{} is not attached to exactly one network", self.name()))
        })?;
        parse_ip(self.name(), ip)
    }

    /// Login name for `user`
    pub fn login(&self, user: ShellUser) -> String {
        match user {
            ShellUser::Root => ROOT.to_string(),
            ShellUser::Cluster => role::user_name(&self.prefix),
        }
    }

    pub fn endpoint(&self, user: ShellUser) -> Result<RemoteEndpoint> {
        Ok(RemoteEndpoint::new(
            self.public_ip()?.to_string(),
            self.login(user),
            &self.key_file,
        ))
    }

    /// Reload the server record from the provider
    pub async fn refresh(&mut self, ctx: &ClusterContext) -> Result<()> {
        self.server = ctx.provider.server(self.server.id).await?;
        Ok(())
    }

    /// Whether `user` can log in right now
    pub async fn ping(&self, ctx: &ClusterContext, user: ShellUser) -> Result<bool> {
        let spec = CommandSpec::from_args(["exit"])?.on_host(&self.endpoint(user)?);
        let options = RunOptions::with_timeout(ctx.config.ping_timeout()).detached_stdin();
        let output = ctx.runner.run(&spec, &options).await?;
        Ok(output.success())
    }

    async fn wait_for_shell(&self, ctx: &ClusterContext, user: ShellUser) -> Result<u32> {
        let login = self.login(user);
        info!("Waiting for ssh, user {:?} ...", login);
        let attempts = ctx
            .config
            .shell_poll()
            .poll(&format!("ssh on {} as {}", self.name(), login), |_| self.ping(ctx, user))
            .await?;
        info!("ssh is up");
        Ok(attempts)
    }

    /// The current boot id, or `None` while the node does not answer
    async fn boot_id(&self, ctx: &ClusterContext) -> Result<Option<String>> {
        let spec = CommandSpec::from_args(BOOT_ID_COMMAND)?.on_host(&self.endpoint(ShellUser::Root)?);
        let options = RunOptions::with_timeout(ctx.config.ping_timeout()).detached_stdin();
        let output = ctx.runner.run(&spec, &options).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output
            .stdout()
            .last()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty()))
    }

    /// Wait until root logs in on a boot other than `previous`
    async fn wait_for_reboot(&self, ctx: &ClusterContext, previous: &str) -> Result<u32> {
        info!("Waiting for the node to come back from reboot ...");
        let attempts = ctx
            .config
            .shell_poll()
            .poll(&format!("reboot of {}", self.name()), |_| async move {
                let current = self.boot_id(ctx).await?;
                Ok::<_, ClusterError>(current.is_some_and(|id| id != previous))
            })
            .await?;
        info!("ssh is up after reboot");
        Ok(attempts)
    }

    async fn await_shell(&mut self, ctx: &ClusterContext, user: ShellUser) -> Result<()> {
        self.fsm.process(BootstrapEvent::AwaitShell(user))?;
        self.wait_for_shell(ctx, user).await?;
        Ok(())
    }

    async fn run_remote<I, S>(&self, ctx: &ClusterContext, user: ShellUser, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::from_args(args)?.on_host(&self.endpoint(user)?);
        debug!("Running {}", spec);
        ctx.runner
            .run_strict(&spec, &RunOptions::default().detached_stdin())
            .await?;
        Ok(())
    }

    async fn copy_to_home(&self, ctx: &ClusterContext, user: ShellUser, sources: &[PathBuf]) -> Result<()> {
        let spec = CommandSpec::remote_copy(sources, "~/", &self.endpoint(user)?)?;
        ctx.runner
            .run_strict(&spec, &RunOptions::default().detached_stdin())
            .await?;
        Ok(())
    }

    /// Run every bootstrap stage; the node ends up `Bootstrapped` or `Failed`
    pub async fn bootstrap(&mut self, ctx: &ClusterContext) -> Result<()> {
        let span = self.span.clone();
        let result = self.bootstrap_stages(ctx).instrument(span).await;
        self.record_failure(result)
    }

    async fn bootstrap_stages(&mut self, ctx: &ClusterContext) -> Result<()> {
        let assets = ctx.config.asset_dir();
        let prefix = self.prefix.clone();

        self.await_shell(ctx, ShellUser::Root).await?;

        info!("Copying root files to node ...");
        let root_files: Vec<PathBuf> = ROOT_STAGE_FILES.iter().map(|name| assets.join(name)).collect();
        self.copy_to_home(ctx, ShellUser::Root, &root_files).await?;
        self.fsm.process(BootstrapEvent::CopyRootStage)?;

        info!("Running first bootstrap script ...");
        self.run_remote(ctx, ShellUser::Root, ["bash", "bootstrap_01.sh"]).await?;
        self.fsm.process(BootstrapEvent::RunRootStage)?;

        let previous_boot = self.boot_id(ctx).await?.ok_or_else(|| {
            ClusterError::invariant(format!("could not read the boot id of {}", self.name()))
        })?;
        info!("Rebooting ...");
        ctx.provider.reboot_server(self.server.id).await?;
        self.fsm.process(BootstrapEvent::Reboot)?;
        self.fsm.process(BootstrapEvent::AwaitShell(ShellUser::Root))?;
        self.wait_for_reboot(ctx, &previous_boot).await?;

        info!("Running second bootstrap script ...");
        self.run_remote(ctx, ShellUser::Root, ["bash", "bootstrap_02.sh", prefix.as_str()])
            .await?;
        self.fsm.process(BootstrapEvent::RunSecondStage)?;

        self.await_shell(ctx, ShellUser::Cluster).await?;

        info!("Copying user files to node ...");
        let mut user_files: Vec<PathBuf> = USER_STAGE_FILES.iter().map(|name| assets.join(name)).collect();
        user_files.extend(ctx.layout.tls_upload());
        self.copy_to_home(ctx, ShellUser::Cluster, &user_files).await?;
        self.fsm.process(BootstrapEvent::CopyUserStage)?;

        info!("Running third (user) bootstrap script ...");
        self.run_remote(ctx, ShellUser::Cluster, ["bash", "bootstrap_03.sh", prefix.as_str()])
            .await?;
        self.fsm.process(BootstrapEvent::RunUserStage)?;

        self.fsm.process(BootstrapEvent::Complete)?;
        info!("Bootstrapping done");
        Ok(())
    }

    /// Start the runtime process of this node's role.
    ///
    /// Workers need the coordinator's private address.
    pub async fn start_role(
        &mut self,
        ctx: &ClusterContext,
        ports: RuntimePorts,
        coordinator_ip: Option<Ipv4Addr>,
    ) -> Result<()> {
        let span = self.span.clone();
        let result = self
            .start_role_inner(ctx, ports, coordinator_ip)
            .instrument(span)
            .await;
        self.record_failure(result)
    }

    async fn start_role_inner(
        &mut self,
        ctx: &ClusterContext,
        ports: RuntimePorts,
        coordinator_ip: Option<Ipv4Addr>,
    ) -> Result<()> {
        if !matches!(self.fsm.state(), BootstrapState::Bootstrapped) {
            return Err(ClusterError::invariant(format!(
                "{} cannot start its role in state {:?}",
                self.name(),
                self.fsm.state()
            )));
        }
        let args = match self.role {
            NodeRole::Coordinator => vec![
                "bash".to_string(),
                "-i".to_string(),
                "bootstrap_scheduler.sh".to_string(),
                ports.ipc.to_string(),
                ports.dash.to_string(),
            ],
            NodeRole::Worker(_) => {
                let coordinator_ip = coordinator_ip.ok_or_else(|| {
                    ClusterError::invariant("a worker needs the coordinator's private address")
                })?;
                vec![
                    "bash".to_string(),
                    "-i".to_string(),
                    "bootstrap_worker.sh".to_string(),
                    coordinator_ip.to_string(),
                    ports.ipc.to_string(),
                    ports.dash.to_string(),
                    ports.nanny.to_string(),
                ]
            }
        };

        self.wait_for_shell(ctx, ShellUser::Cluster).await?;
        info!("Starting {} ...", self.role);
        self.run_remote(ctx, ShellUser::Cluster, args).await?;
        self.fsm.process(BootstrapEvent::StartRole(self.role))?;
        info!("{} started", self.role);
        Ok(())
    }

    fn record_failure(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            // already Failed
            let _ = self.fsm.process(BootstrapEvent::Fail(e.to_string()));
        }
        result
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let public = self.server.public_ipv4().unwrap_or("-");
        let private = self.server.private_ipv4().unwrap_or("-");
        write!(f, "<node name={} public={} private={}>", self.name(), public, private)
    }
}

fn parse_ip(name: &str, ip: &str) -> Result<Ipv4Addr> {
    ip.parse()
        .map_err(|_| ClusterError::invariant(format!("{name} reports an invalid address {ip:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcloud_models::{Ipv4Address, PrivateNet, PublicNet};

    fn server(name: &str) -> Server {
        Server {
            id: 7,
            name: name.to_string(),
            status: ServerStatus::Running,
            public_net: PublicNet {
                ipv4: Some(Ipv4Address {
                    ip: "203.0.113.9".to_string(),
                    blocked: false,
                    dns_ptr: None,
                }),
                ipv6: None,
                firewalls: Vec::new(),
            },
            private_net: vec![PrivateNet {
                network: 1,
                ip: "10.0.1.100".to_string(),
                alias_ips: Vec::new(),
                mac_address: None,
            }],
            labels: Labels::new(),
            server_type: None,
            created: None,
        }
    }

    #[test]
    fn test_from_server() {
        let node = Node::from_server("demo", server("demo-node-worker000"), Path::new("demo.key")).unwrap();
        assert_eq!(node.role(), NodeRole::Worker(0));
        assert_eq!(node.private_ip().unwrap(), Ipv4Addr::new(10, 0, 1, 100));
        assert_eq!(
            node.to_string(),
            "<node name=demo-node-worker000 public=203.0.113.9 private=10.0.1.100>"
        );
        assert!(Node::from_server("demo", server("demo-network"), Path::new("demo.key")).is_err());
    }

    #[test]
    fn test_endpoints_per_user() {
        let node = Node::from_server("demo", server("demo-node-scheduler"), Path::new("demo.key")).unwrap();
        let root = node.endpoint(ShellUser::Root).unwrap();
        assert_eq!(root.user_at_host(), "root@203.0.113.9");
        let user = node.endpoint(ShellUser::Cluster).unwrap();
        assert_eq!(user.user, "demouser");
        assert_eq!(user.key_file, PathBuf::from("demo.key"));
    }
}

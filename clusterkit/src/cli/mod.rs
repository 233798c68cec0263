//! Command line interface

pub mod table;
pub mod transport;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use crate::catalog;
use crate::cluster::config::ClusterConfig;
use crate::cluster::Cluster;
use crate::context::ClusterContext;
use crate::errors::{ClusterError, Result};
use crate::logs::LogLevel;
use crate::provider::HetznerClient;

/// Provision and manage Dask clusters on Hetzner Cloud
#[derive(Parser, Debug)]
#[command(name = "clusterkit", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command; unset flags fall back to the settings file
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Name prefix of the cluster [default: cluster]
    #[arg(short, long, global = true)]
    pub prefix: Option<String>,

    /// Environment variable holding the API token [default: HETZNER]
    #[arg(short, long, global = true)]
    pub tokenvar: Option<String>,

    /// Seconds between readiness checks [default: 0.5]
    #[arg(short = 'a', long, global = true)]
    pub wait: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// JSON settings file
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a new cluster
    Create(CreateArgs),

    /// Destroy an existing cluster
    Destroy,

    /// Remove everything carrying the cluster prefix, even if the cluster is broken
    Nuke,

    /// List the nodes of a cluster
    Ls,

    /// Open a shell on a node (`scheduler`, `worker000`, ...)
    Ssh {
        hostname: String,
    },

    /// Copy files from or to a node, using `<node>:<path>` on one side
    Scp {
        #[arg(short, long)]
        verbose: bool,

        /// Sources followed by the target
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },

    /// List datacenters, or the server types of one datacenter
    Catalog {
        datacenter: Option<String>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct CreateArgs {
    /// Instance type of the coordinator [default: cx11]
    #[arg(short = 'c', long)]
    pub scheduler: Option<String>,

    /// Instance type of the workers [default: cx11]
    #[arg(short = 'w', long)]
    pub worker: Option<String>,

    /// Operating system image [default: ubuntu-20.04]
    #[arg(short, long)]
    pub image: Option<String>,

    /// Datacenter [default: fsn1-dc14]
    #[arg(short, long)]
    pub datacenter: Option<String>,

    /// Number of workers [default: 1]
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,

    /// Scheduler/worker communication port [default: 9753]
    #[arg(long)]
    pub dask_ipc: Option<u16>,

    /// Dashboard port [default: 9756]
    #[arg(long)]
    pub dask_dash: Option<u16>,

    /// Nanny port [default: 9759]
    #[arg(long)]
    pub dask_nanny: Option<u16>,
}

impl CommonArgs {
    /// Settings file (or defaults) with the given flags applied
    pub async fn config(&self) -> Result<ClusterConfig> {
        let mut config = match &self.settings {
            Some(path) => ClusterConfig::from_file(path).await?,
            None => ClusterConfig::default(),
        };
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(tokenvar) = &self.tokenvar {
            config.tokenvar = tokenvar.clone();
        }
        if let Some(wait) = self.wait {
            config.wait = wait;
        }
        Ok(config)
    }
}

impl CreateArgs {
    pub fn apply(&self, config: &mut ClusterConfig) {
        if let Some(scheduler) = &self.scheduler {
            config.scheduler_type = scheduler.clone();
        }
        if let Some(worker) = &self.worker {
            config.worker_type = worker.clone();
        }
        if let Some(image) = &self.image {
            config.image = image.clone();
        }
        if let Some(datacenter) = &self.datacenter {
            config.datacenter = datacenter.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(ipc) = self.dask_ipc {
            config.ports.ipc = ipc;
        }
        if let Some(dash) = self.dask_dash {
            config.ports.dash = dash;
        }
        if let Some(nanny) = self.dask_nanny {
            config.ports.nanny = nanny;
        }
    }
}

/// Hint printed after a failure, if one applies
pub fn hint(err: &ClusterError) -> Option<String> {
    match err {
        ClusterError::ResourceNotFound { name, .. } if name.ends_with("-node-scheduler") => Some(
            "Cluster scheduler could not be found. Cluster likely does not exist.".to_string(),
        ),
        ClusterError::Incomplete { prefix, .. } => Some(format!(
            "Cluster creation stopped part-way. Run `clusterkit nuke --prefix {prefix}` to remove what was created."
        )),
        err if err.suggests_nuke() => Some(format!(
            "Cluster component missing ({err}). Cluster likely needs to be nuked."
        )),
        _ => None,
    }
}

/// Execute a parsed command; returns the process exit code
pub async fn run(cli: Cli) -> Result<i32> {
    let mut config = cli.common.config().await?;

    match cli.command {
        Command::Create(args) => {
            args.apply(&mut config);
            config.validate()?;
            let cluster = Cluster::create(ClusterContext::production(config)?).await?;
            println!("{cluster}");
            println!("{}", cluster.client_descriptor()?);
        }
        Command::Destroy => {
            let mut cluster = Cluster::attach(ClusterContext::production(config)?).await?;
            let report = cluster.destroy().await?;
            info!("Deleted {} resource(s)", report.deleted.len());
            println!("{cluster}");
        }
        Command::Nuke => {
            let report = Cluster::nuke(&ClusterContext::production(config)?).await?;
            for (kind, name) in &report.deleted {
                println!("deleted {kind} {name}");
            }
            for (kind, name) in &report.skipped {
                println!("{} {kind} {name}", "skipped".yellow());
            }
            for (kind, name, reason) in &report.failed {
                eprintln!("{} {kind} {name}: {reason}", "failed".red());
            }
            if !report.is_clean() {
                return Ok(1);
            }
        }
        Command::Ls => {
            let cluster = Cluster::attach(ClusterContext::production(config)?).await?;
            println!("{cluster}");
            for node in cluster.nodes_by_suffix().values() {
                println!("{node}");
            }
        }
        Command::Ssh { hostname } => {
            let cluster = Cluster::attach(ClusterContext::production(config)?).await?;
            let args = transport::ssh_command(&cluster.nodes_by_suffix(), cluster.prefix(), &hostname)?;
            return transport::run_interactive(&args).await;
        }
        Command::Scp { verbose, paths } => {
            let (target, sources) = paths
                .split_last()
                .ok_or_else(|| ClusterError::ConfigError("scp needs a source and a target".to_string()))?;
            let cluster = Cluster::attach(ClusterContext::production(config)?).await?;
            let args = transport::scp_command(&cluster.nodes_by_suffix(), cluster.prefix(), sources, target, verbose)?;
            return transport::run_interactive(&args).await;
        }
        Command::Catalog { datacenter } => {
            let provider = HetznerClient::from_env(&config.tokenvar)?;
            let output = match datacenter {
                None => {
                    let rows: Vec<Vec<String>> = catalog::datacenters(&provider)
                        .await?
                        .iter()
                        .map(catalog::DatacenterEntry::cells)
                        .collect();
                    table::render(&catalog::DatacenterEntry::COLUMNS, &rows)
                }
                Some(datacenter) => {
                    let rows: Vec<Vec<String>> = catalog::server_types(&provider, &datacenter)
                        .await?
                        .iter()
                        .map(catalog::ServerTypeEntry::cells)
                        .collect();
                    table::render(&catalog::ServerTypeEntry::COLUMNS, &rows)
                }
            };
            println!("{output}");
        }
    }
    Ok(0)
}

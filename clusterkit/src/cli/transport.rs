//! Interactive ssh and scp into cluster nodes

use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::errors::{ClusterError, Result};
use crate::node::{Node, ShellUser};

/// One side of a copy, either local or `<node>:<path>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyPath {
    Local(String),
    Remote { node: String, path: String },
}

impl CopyPath {
    pub fn parse(raw: &str) -> Self {
        let path = raw.replace("\\\\", "/").replace('\\', "/");
        match path.split_once(':') {
            // drive letters stay local
            Some((host, _)) if host.len() == 1 && host.chars().all(|c| c.is_ascii_alphabetic()) => {
                CopyPath::Local(path)
            }
            Some((host, rest)) => CopyPath::Remote {
                node: host.to_string(),
                path: rest.to_string(),
            },
            None => CopyPath::Local(path),
        }
    }
}

fn lookup<'a>(nodes: &BTreeMap<String, &'a Node>, suffix: &str, prefix: &str) -> Result<&'a Node> {
    nodes.get(suffix).copied().ok_or_else(|| {
        let known: Vec<&str> = nodes.keys().map(String::as_str).collect();
        ClusterError::ConfigError(format!(
            "\"{suffix}\" is unknown in cluster \"{prefix}\": {}",
            known.join(", ")
        ))
    })
}

/// Full `ssh` command line for an interactive session as the cluster user
pub fn ssh_command(nodes: &BTreeMap<String, &Node>, prefix: &str, suffix: &str) -> Result<Vec<String>> {
    let node = lookup(nodes, suffix, prefix)?;
    let mut args = vec!["ssh".to_string()];
    args.extend(node.endpoint(ShellUser::Cluster)?.interactive_ssh_args());
    Ok(args)
}

/// Full `scp` command line; exactly one side may name a node
pub fn scp_command(
    nodes: &BTreeMap<String, &Node>,
    prefix: &str,
    sources: &[String],
    target: &str,
    verbose: bool,
) -> Result<Vec<String>> {
    let mut source_node: Option<&str> = None;
    let mut paths = Vec::with_capacity(sources.len() + 1);
    let mut endpoint = None;

    for source in sources {
        match CopyPath::parse(source) {
            CopyPath::Local(path) => paths.push(path),
            CopyPath::Remote { node, path } => {
                let found = lookup(nodes, &node, prefix)?;
                if source_node.is_some_and(|previous| previous != found.name()) {
                    return Err(ClusterError::ConfigError(
                        "Can not copy data from multiple hosts.".to_string(),
                    ));
                }
                source_node = Some(found.name());
                let remote = found.endpoint(ShellUser::Cluster)?;
                paths.push(remote.remote_path(&path));
                endpoint = Some(remote);
            }
        }
    }

    match CopyPath::parse(target) {
        CopyPath::Local(path) => {
            if endpoint.is_none() {
                return Err(ClusterError::ConfigError("No host provided.".to_string()));
            }
            paths.push(path);
        }
        CopyPath::Remote { node, path } => {
            if endpoint.is_some() {
                return Err(ClusterError::ConfigError(
                    "Can not copy data from one host to another.".to_string(),
                ));
            }
            let remote = lookup(nodes, &node, prefix)?.endpoint(ShellUser::Cluster)?;
            paths.push(remote.remote_path(&path));
            endpoint = Some(remote);
        }
    }

    let endpoint = endpoint.ok_or_else(|| ClusterError::ConfigError("No host provided.".to_string()))?;
    let mut args = vec!["scp".to_string()];
    args.extend(endpoint.interactive_scp_args());
    args.push("-q".to_string());
    if verbose {
        args.push("-v".to_string());
    }
    args.extend(paths);
    Ok(args)
}

/// Run a command attached to the terminal; returns its exit code
pub async fn run_interactive(args: &[String]) -> Result<i32> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| ClusterError::invariant("empty command line"))?;
    debug!("Running {}", args.join(" "));
    let status = Command::new(program)
        .args(rest)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;
    Ok(status.code().unwrap_or(-1))
}

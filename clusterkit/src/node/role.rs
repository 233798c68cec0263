//! Node roles and the naming scheme of cluster resources

use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::errors::{ClusterError, Result};

/// Address range of the private cluster network
pub const NETWORK_RANGE: &str = "10.0.1.0/24";

pub const COORDINATOR_SUFFIX: &str = "scheduler";
pub const WORKER_SUFFIX: &str = "worker";

/// Host part of the coordinator's private address
const COORDINATOR_HOST: u8 = 200;

/// Host part of the first worker's private address
const WORKER_HOST_BASE: u8 = 100;

/// Workers addressable below the coordinator address
pub const MAX_WORKERS: usize = (COORDINATOR_HOST - WORKER_HOST_BASE) as usize;

/// Role of one node, derived from its name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeRole {
    Coordinator,
    Worker(usize),
}

impl NodeRole {
    /// `scheduler` or `worker###`
    pub fn suffix(&self) -> String {
        match self {
            NodeRole::Coordinator => COORDINATOR_SUFFIX.to_string(),
            NodeRole::Worker(index) => format!("{WORKER_SUFFIX}{index:03}"),
        }
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self, NodeRole::Coordinator)
    }

    /// Parse a bare suffix as produced by [`NodeRole::suffix`]
    pub fn from_suffix(suffix: &str) -> Result<Self> {
        if suffix == COORDINATOR_SUFFIX {
            return Ok(NodeRole::Coordinator);
        }
        let digits = suffix
            .strip_prefix(WORKER_SUFFIX)
            .filter(|digits| digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| ClusterError::invariant(format!("unknown node suffix: {suffix:?}")))?;
        let index = digits
            .parse()
            .map_err(|_| ClusterError::invariant(format!("unknown node suffix: {suffix:?}")))?;
        Ok(NodeRole::Worker(index))
    }

    /// Recover the role from a full server name of the cluster `prefix`
    pub fn from_server_name(prefix: &str, name: &str) -> Result<Self> {
        let suffix = name.strip_prefix(&node_name_prefix(prefix)).ok_or_else(|| {
            ClusterError::invariant(format!("{name:?} is not a node of cluster {prefix:?}"))
        })?;
        Self::from_suffix(suffix)
    }

    /// Fixed address of this node inside the cluster network
    pub fn private_ip(&self) -> Result<Ipv4Addr> {
        let host = match self {
            NodeRole::Coordinator => COORDINATOR_HOST,
            NodeRole::Worker(index) if *index < MAX_WORKERS => WORKER_HOST_BASE + *index as u8,
            NodeRole::Worker(index) => {
                return Err(ClusterError::invariant(format!(
                    "worker index {index} exceeds the {MAX_WORKERS} addressable workers"
                )))
            }
        };
        let network: Ipv4Net = NETWORK_RANGE
            .parse()
            .map_err(|e| ClusterError::Internal(format!("bad network range {NETWORK_RANGE}: {e}")))?;
        Ok(Ipv4Addr::from(u32::from(network.network()) + u32::from(host)))
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

pub fn node_name_prefix(prefix: &str) -> String {
    format!("{prefix}-node-")
}

pub fn node_name(prefix: &str, role: NodeRole) -> String {
    format!("{}{}", node_name_prefix(prefix), role.suffix())
}

pub fn network_name(prefix: &str) -> String {
    format!("{prefix}-network")
}

pub fn firewall_name(prefix: &str) -> String {
    format!("{prefix}-firewall")
}

pub fn key_name(prefix: &str) -> String {
    format!("{prefix}-key")
}

/// Unprivileged account created on every node by the second bootstrap stage
pub fn user_name(prefix: &str) -> String {
    format!("{prefix}user")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(node_name("demo", NodeRole::Coordinator), "demo-node-scheduler");
        assert_eq!(node_name("demo", NodeRole::Worker(7)), "demo-node-worker007");
        assert_eq!(network_name("demo"), "demo-network");
        assert_eq!(firewall_name("demo"), "demo-firewall");
        assert_eq!(key_name("demo"), "demo-key");
        assert_eq!(user_name("demo"), "demouser");
    }

    #[test]
    fn test_role_recovery_validates_names() {
        assert_eq!(
            NodeRole::from_server_name("demo", "demo-node-scheduler").unwrap(),
            NodeRole::Coordinator
        );
        assert_eq!(
            NodeRole::from_server_name("demo", "demo-node-worker012").unwrap(),
            NodeRole::Worker(12)
        );
        assert!(NodeRole::from_server_name("demo", "other-node-worker000").is_err());
        assert!(NodeRole::from_server_name("demo", "demo-node-worker12").is_err());
        assert!(NodeRole::from_server_name("demo", "demo-node-workerabc").is_err());
        assert!(NodeRole::from_server_name("demo", "demo-node-gateway").is_err());
    }

    #[test]
    fn test_private_addresses() {
        assert_eq!(NodeRole::Coordinator.private_ip().unwrap(), Ipv4Addr::new(10, 0, 1, 200));
        assert_eq!(NodeRole::Worker(0).private_ip().unwrap(), Ipv4Addr::new(10, 0, 1, 100));
        assert_eq!(NodeRole::Worker(99).private_ip().unwrap(), Ipv4Addr::new(10, 0, 1, 199));
        assert!(NodeRole::Worker(100).private_ip().is_err());

        let network: Ipv4Net = NETWORK_RANGE.parse().unwrap();
        assert!(network.contains(&NodeRole::Coordinator.private_ip().unwrap()));
    }
}

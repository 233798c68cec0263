//! Cluster configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::ports::RuntimePorts;
use crate::errors::{ClusterError, Result};
use crate::filesys::file::File;
use crate::node::role::MAX_WORKERS;
use crate::poll::PollPolicy;

/// Settings of one cluster, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Name prefix of every resource and local file
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Environment variable holding the provider API token
    #[serde(default = "default_tokenvar")]
    pub tokenvar: String,

    /// Seconds between readiness checks
    #[serde(default = "default_wait")]
    pub wait: f64,

    /// Seconds to wait for a node to accept ssh logins
    #[serde(default = "default_shell_deadline")]
    pub shell_deadline_secs: u64,

    /// Seconds to wait for a server to reach `running`
    #[serde(default = "default_server_deadline")]
    pub server_deadline_secs: u64,

    /// Seconds one ssh readiness check may take
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Instance type of the coordinator
    #[serde(default = "default_instance_type")]
    pub scheduler_type: String,

    /// Instance type of the workers
    #[serde(default = "default_instance_type")]
    pub worker_type: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_datacenter")]
    pub datacenter: String,

    /// Number of worker nodes
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_network_zone")]
    pub network_zone: String,

    #[serde(default)]
    pub ports: RuntimePorts,

    /// Directory with the bootstrap scripts; the bundled `share` directory when absent
    #[serde(default)]
    pub asset_dir: Option<PathBuf>,
}

fn default_prefix() -> String {
    "cluster".to_string()
}

fn default_tokenvar() -> String {
    "HETZNER".to_string()
}

fn default_wait() -> f64 {
    0.5
}

fn default_shell_deadline() -> u64 {
    900
}

fn default_server_deadline() -> u64 {
    300
}

fn default_ping_timeout() -> u64 {
    5
}

fn default_instance_type() -> String {
    "cx11".to_string()
}

fn default_image() -> String {
    "ubuntu-20.04".to_string()
}

fn default_datacenter() -> String {
    "fsn1-dc14".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_network_zone() -> String {
    "eu-central".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            tokenvar: default_tokenvar(),
            wait: default_wait(),
            shell_deadline_secs: default_shell_deadline(),
            server_deadline_secs: default_server_deadline(),
            ping_timeout_secs: default_ping_timeout(),
            scheduler_type: default_instance_type(),
            worker_type: default_instance_type(),
            image: default_image(),
            datacenter: default_datacenter(),
            workers: default_workers(),
            network_zone: default_network_zone(),
            ports: RuntimePorts::default(),
            asset_dir: None,
        }
    }
}

impl ClusterConfig {
    /// Read a settings file; missing fields take their defaults
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::new(path.as_ref());
        file.read_json().await.map_err(|e| {
            ClusterError::ConfigError(format!(
                "unable to read settings from {}: {e}",
                file.path().display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        let valid_prefix = !self.prefix.is_empty()
            && self
                .prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !self.prefix.starts_with('-');
        if !valid_prefix {
            return Err(ClusterError::ConfigError(format!(
                "invalid prefix {:?}: use lowercase letters, digits and dashes",
                self.prefix
            )));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ClusterError::ConfigError(format!(
                "workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if !self.wait.is_finite() || self.wait <= 0.0 {
            return Err(ClusterError::ConfigError(format!(
                "wait must be a positive number of seconds, got {}",
                self.wait
            )));
        }
        if self.ping_timeout_secs == 0 {
            return Err(ClusterError::ConfigError("ping timeout must be positive".to_string()));
        }
        self.ports.validate()
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs_f64(self.wait)
    }

    /// Polling of ssh logins on a node
    pub fn shell_poll(&self) -> PollPolicy {
        PollPolicy::new(self.wait_interval(), Duration::from_secs(self.shell_deadline_secs))
    }

    /// Polling of a server's status at the provider
    pub fn server_poll(&self) -> PollPolicy {
        PollPolicy::new(self.wait_interval(), Duration::from_secs(self.server_deadline_secs))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// Directory holding the bootstrap scripts
    pub fn asset_dir(&self) -> PathBuf {
        self.asset_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("share"))
    }
}

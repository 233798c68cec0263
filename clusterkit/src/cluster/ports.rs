//! Ports of the distributed runtime

use std::fmt;

use hcloud_models::Labels;
use serde::{Deserialize, Serialize};

use crate::errors::{ClusterError, Result};

pub const IPC_LABEL: &str = "dask_ipc";
pub const DASH_LABEL: &str = "dask_dash";
pub const NANNY_LABEL: &str = "dask_nanny";

/// Lowest port the runtime may bind
pub const MIN_PORT: u16 = 1024;

/// Scheduler/worker communication, dashboard and nanny ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePorts {
    pub ipc: u16,
    pub dash: u16,
    pub nanny: u16,
}

impl Default for RuntimePorts {
    fn default() -> Self {
        Self {
            ipc: 9753,
            dash: 9756,
            nanny: 9759,
        }
    }
}

impl RuntimePorts {
    /// Validated ports: pairwise distinct and unprivileged
    pub fn new(ipc: u16, dash: u16, nanny: u16) -> Result<Self> {
        let ports = Self { ipc, dash, nanny };
        ports.validate()?;
        Ok(ports)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, port) in self.named() {
            if port < MIN_PORT {
                return Err(ClusterError::invariant(format!(
                    "{name} port {port} is below {MIN_PORT}"
                )));
            }
        }
        if self.ipc == self.dash || self.ipc == self.nanny || self.dash == self.nanny {
            return Err(ClusterError::invariant(format!(
                "runtime ports must be distinct: {self}"
            )));
        }
        Ok(())
    }

    fn named(&self) -> [(&'static str, u16); 3] {
        [("ipc", self.ipc), ("dash", self.dash), ("nanny", self.nanny)]
    }

    /// Coordinator labels persisting the ports
    pub fn labels(&self) -> Labels {
        [
            (IPC_LABEL, self.ipc),
            (DASH_LABEL, self.dash),
            (NANNY_LABEL, self.nanny),
        ]
        .into_iter()
        .map(|(label, port)| (label.to_string(), port.to_string()))
        .collect()
    }

    /// Recover the ports from coordinator labels
    pub fn from_labels(labels: &Labels) -> Result<Self> {
        let port = |label: &str| -> Result<u16> {
            let value = labels.get(label).ok_or_else(|| {
                ClusterError::invariant(format!("coordinator label {label} is missing"))
            })?;
            value.parse().map_err(|_| {
                ClusterError::invariant(format!("coordinator label {label}={value:?} is not a port"))
            })
        };
        Self::new(port(IPC_LABEL)?, port(DASH_LABEL)?, port(NANNY_LABEL)?)
    }
}

impl fmt::Display for RuntimePorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ipc={} dash={} nanny={}", self.ipc, self.dash, self.nanny)
    }
}

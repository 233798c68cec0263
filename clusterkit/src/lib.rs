//! clusterkit library
//!
//! Provisions a coordinator and worker nodes on Hetzner Cloud, bootstraps
//! them over ssh and starts a TLS-secured Dask runtime across them.

pub mod catalog;
pub mod cli;
pub mod cluster;
pub mod command;
pub mod context;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod node;
pub mod poll;
pub mod provider;
pub mod provision;
pub mod utils;

pub use cluster::config::ClusterConfig;
pub use cluster::Cluster;
pub use context::ClusterContext;
pub use errors::{ClusterError, Result};

//! Error types for clusterkit

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Kind of a provider resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Server,
    Network,
    Firewall,
    SshKey,
}

impl ResourceKind {
    /// All kinds, in the order they must be deleted
    pub const DELETION_ORDER: [ResourceKind; 4] = [
        ResourceKind::Server,
        ResourceKind::Network,
        ResourceKind::SshKey,
        ResourceKind::Firewall,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Server => "server",
            ResourceKind::Network => "network",
            ResourceKind::Firewall => "firewall",
            ResourceKind::SshKey => "ssh key",
        };
        f.write_str(name)
    }
}

/// Captured outcome of a failed pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    /// Rendered command line
    pub command: String,
    /// Standard output of each stage
    pub stdout: Vec<String>,
    /// Standard error of each stage
    pub stderr: Vec<String>,
    /// Exit code of each stage
    pub status: Vec<i32>,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "command failed: {}", self.command)?;
        for (index, ((out, err), code)) in self
            .stdout
            .iter()
            .zip(self.stderr.iter())
            .zip(self.status.iter())
            .enumerate()
        {
            writeln!(f, "[stage {index}] exit code {code}")?;
            if !out.is_empty() {
                writeln!(f, "[stage {index}] stdout:\n{}", out.trim_end())?;
            }
            if !err.is_empty() {
                writeln!(f, "[stage {index}] stderr:\n{}", err.trim_end())?;
            }
        }
        Ok(())
    }
}

/// Main error type for clusterkit
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} not found: {name}")]
    ResourceNotFound { kind: ResourceKind, name: String },

    #[error("{0}")]
    CommandFailed(Box<CommandFailure>),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Provider error ({status}): {message}")]
    ProviderError { status: u16, message: String },

    #[error("Provider action {command} failed: {message}")]
    ActionFailed { command: String, message: String },

    #[error("Cluster {prefix} is incomplete: {source}")]
    Incomplete {
        prefix: String,
        source: Box<ClusterError>,
    },

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        ClusterError::ResourceNotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        ClusterError::InvariantViolation(message.into())
    }

    /// `err` interrupted creation after resources of `prefix` may exist
    pub fn incomplete(prefix: impl Into<String>, err: ClusterError) -> Self {
        ClusterError::Incomplete {
            prefix: prefix.into(),
            source: Box::new(err),
        }
    }

    /// The error that interrupted an incomplete creation, or `self`
    pub fn cause(&self) -> &ClusterError {
        match self {
            ClusterError::Incomplete { source, .. } => source.cause(),
            err => err,
        }
    }

    /// Whether the error points at a missing component of an existing cluster
    pub fn suggests_nuke(&self) -> bool {
        matches!(self, ClusterError::ResourceNotFound { .. })
    }
}

impl From<CommandFailure> for ClusterError {
    fn from(failure: CommandFailure) -> Self {
        ClusterError::CommandFailed(Box::new(failure))
    }
}

impl From<rcgen::Error> for ClusterError {
    fn from(err: rcgen::Error) -> Self {
        ClusterError::CertificateError(err.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T, E = ClusterError> = std::result::Result<T, E>;

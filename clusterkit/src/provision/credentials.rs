//! Local key and certificate files of a cluster

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::{ClusterError, Result};
use crate::filesys::file::File;

/// Paths of the per-cluster credential files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialLayout {
    /// Directory holding every credential file
    pub base_dir: PathBuf,

    /// Cluster prefix the file names derive from
    pub prefix: String,
}

impl CredentialLayout {
    /// Create a new credential layout
    pub fn new(base_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Layout in the current working directory
    pub fn in_current_dir(prefix: impl Into<String>) -> Result<Self> {
        Ok(Self::new(std::env::current_dir()?, prefix))
    }

    fn file(&self, suffix: &str) -> File {
        File::new(self.base_dir.join(format!("{}{}", self.prefix, suffix)))
    }

    /// SSH private key, `<prefix>.key`
    pub fn private_key(&self) -> File {
        self.file(".key")
    }

    /// SSH public key, `<prefix>.key.pub`
    pub fn public_key(&self) -> File {
        self.file(".key.pub")
    }

    pub fn ca_key(&self) -> File {
        self.file("_ca.key")
    }

    pub fn ca_cert(&self) -> File {
        self.file("_ca.crt")
    }

    pub fn node_key(&self) -> File {
        self.file("_node.key")
    }

    pub fn node_cert(&self) -> File {
        self.file("_node.crt")
    }

    /// Files copied to every node together with the user stage
    pub fn tls_upload(&self) -> Vec<PathBuf> {
        [self.ca_cert(), self.node_cert(), self.node_key()]
            .into_iter()
            .map(|file| file.path().to_path_buf())
            .collect()
    }

    pub fn ssh_files(&self) -> Vec<File> {
        vec![self.private_key(), self.public_key()]
    }

    pub fn tls_files(&self) -> Vec<File> {
        vec![self.ca_key(), self.ca_cert(), self.node_key(), self.node_cert()]
    }

    pub fn all_files(&self) -> Vec<File> {
        let mut files = self.ssh_files();
        files.extend(self.tls_files());
        files
    }

    /// Fail if any of `files` is already present
    pub async fn ensure_absent(files: &[File]) -> Result<()> {
        for file in files {
            if file.exists().await {
                return Err(ClusterError::invariant(format!(
                    "{} already exists, refusing to overwrite it",
                    file.path().display()
                )));
            }
        }
        Ok(())
    }

    /// Delete every credential file; returns the paths that were removed
    pub async fn remove_all(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for file in self.all_files() {
            if file.delete().await? {
                debug!("Removed {}", file.path().display());
                removed.push(file.path().to_path_buf());
            }
        }
        if !removed.is_empty() {
            info!("Removed {} local credential file(s)", removed.len());
        }
        Ok(removed)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::{ClusterError, Result};

/// A file wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write a new file, failing if it already exists
    pub async fn create_new(&self, contents: &str) -> Result<()> {
        self.write_new(contents, fs::OpenOptions::new()).await
    }

    /// Write a new file readable by its owner only (0o600 on Unix).
    ///
    /// The mode is set at open time.
    pub async fn create_private(&self, contents: &str) -> Result<()> {
        let mut options = fs::OpenOptions::new();
        #[cfg(unix)]
        options.mode(0o600);
        self.write_new(contents, options).await
    }

    async fn write_new(&self, contents: &str, mut options: fs::OpenOptions) -> Result<()> {
        let mut file = options
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => ClusterError::invariant(format!(
                    "{} already exists, refusing to overwrite it",
                    self.path.display()
                )),
                _ => ClusterError::IoError(e),
            })?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Delete the file; returns whether it existed
    pub async fn delete(&self) -> Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

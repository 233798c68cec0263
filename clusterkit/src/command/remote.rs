//! Wrapping commands for execution on a remote host over ssh

use std::path::{Path, PathBuf};

use crate::command::spec::CommandSpec;
use crate::errors::{ClusterError, Result};

/// Host name that is never wrapped
pub const LOCALHOST: &str = "localhost";

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CIPHER: &str = "aes256-gcm@openssh.com";
pub const CONNECT_TIMEOUT_SECS: u32 = 5;

#[cfg(windows)]
const NULL_DEVICE: &str = r"\\.\NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// How to reach a node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteEndpoint {
    pub host: String,
    pub user: String,
    pub key_file: PathBuf,
    pub port: u16,
    pub compression: bool,
    pub cipher: String,
}

impl RemoteEndpoint {
    pub fn new(host: impl Into<String>, user: impl Into<String>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            key_file: key_file.into(),
            port: DEFAULT_PORT,
            compression: true,
            cipher: DEFAULT_CIPHER.to_string(),
        }
    }

    /// The endpoint that leaves commands local
    pub fn localhost() -> Self {
        Self::new(LOCALHOST, "", "")
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_cipher(mut self, cipher: impl Into<String>) -> Self {
        self.cipher = cipher.into();
        self
    }

    pub fn is_local(&self) -> bool {
        self.host == LOCALHOST
    }

    pub fn user_at_host(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `-o` options shared by ssh and scp
    fn connection_options(&self, batch_mode: bool) -> Vec<String> {
        let compression = if self.compression { "yes" } else { "no" };
        let mut options = vec![
            format!("Compression={compression}"),
            "StrictHostKeyChecking=no".to_string(),
            format!("UserKnownHostsFile={NULL_DEVICE}"),
        ];
        if batch_mode {
            options.push("BatchMode=yes".to_string());
        }
        options.push(format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"));
        options
            .into_iter()
            .flat_map(|option| ["-o".to_string(), option])
            .collect()
    }

    fn identity_args(&self, port_flag: &str) -> Vec<String> {
        vec![
            port_flag.to_string(),
            self.port.to_string(),
            "-c".to_string(),
            self.cipher.clone(),
            "-i".to_string(),
            self.key_file.to_string_lossy().into_owned(),
        ]
    }

    /// Arguments for an interactive `ssh` session (without the program name)
    pub fn interactive_ssh_args(&self) -> Vec<String> {
        let mut args = self.connection_options(false);
        args.extend(self.identity_args("-p"));
        args.push(self.user_at_host());
        args
    }

    /// Arguments for an interactive `scp` (without the program name and paths)
    pub fn interactive_scp_args(&self) -> Vec<String> {
        let mut args = self.connection_options(false);
        args.extend(self.identity_args("-P"));
        args
    }

    /// `user@host:path` target of a copy
    pub fn remote_path(&self, path: &str) -> String {
        format!("{}:{}", self.user_at_host(), path)
    }
}

impl CommandSpec {
    /// Run this pipeline on `endpoint`; local endpoints return it unchanged
    pub fn on_host(&self, endpoint: &RemoteEndpoint) -> CommandSpec {
        if endpoint.is_local() {
            return self.clone();
        }
        let mut args = vec!["ssh".to_string(), "-T".to_string()];
        args.extend(endpoint.connection_options(true));
        args.extend(endpoint.identity_args("-p"));
        args.push(endpoint.user_at_host());
        args.push(self.render());
        CommandSpec::single_stage(args)
    }

    /// Copy local `sources` to `target` on `endpoint`
    pub fn remote_copy<P: AsRef<Path>>(
        sources: &[P],
        target: &str,
        endpoint: &RemoteEndpoint,
    ) -> Result<CommandSpec> {
        if sources.is_empty() {
            return Err(ClusterError::invariant("remote copy needs at least one source"));
        }
        if target.is_empty() {
            return Err(ClusterError::invariant("remote copy needs a target path"));
        }
        let mut args = vec!["scp".to_string()];
        args.extend(endpoint.connection_options(true));
        args.extend(endpoint.identity_args("-P"));
        args.extend(
            sources
                .iter()
                .map(|source| source.as_ref().to_string_lossy().into_owned()),
        );
        args.push(endpoint.remote_path(target));
        Ok(CommandSpec::single_stage(args))
    }
}

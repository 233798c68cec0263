use serde::{Deserialize, Serialize};

use crate::models::{Labels, Meta};

/// SSH public key registered with the project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    pub id: u64,
    pub name: String,
    pub public_key: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub labels: Labels,
}

/// Create SSH key request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSshKeyRequest {
    pub name: String,
    pub public_key: String,
    pub labels: Labels,
}

/// Single SSH key response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyResponse {
    pub ssh_key: SshKey,
}

/// SSH key list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeysResponse {
    pub ssh_keys: Vec<SshKey>,
    #[serde(default)]
    pub meta: Meta,
}
